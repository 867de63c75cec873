use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// How classified changes are written to the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Overwrite rows in place, no history.
    #[default]
    Upsert,
    /// Keep Type-2 history: close the active version and open a new one.
    Scd2,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Upsert => f.write_str("upsert"),
            MergeMode::Scd2 => f.write_str("scd2"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    /// The greatest ordering value is the most recent one.
    #[default]
    Descending,
}

/// Column deciding which duplicate of a business key wins within a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// What the pipeline driver does with a batch failing schema reconciliation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaErrorPolicy {
    /// Stop and wait for an operator.
    #[default]
    Fail,
    /// Commit the offset without applying the batch and continue.
    Skip,
}

/// Configuration of one merge pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    /// Business key columns.
    pub partition_by: Vec<String>,
    pub order_by: OrderBy,
    #[serde(default)]
    pub mode: MergeMode,
    /// Splice late records into SCD2 history instead of rejecting them.
    #[serde(default)]
    pub allow_backfill: bool,
    /// Add batch columns missing from the target instead of failing the batch.
    #[serde(default)]
    pub allow_schema_evolution: bool,
    /// Treat each batch as a full extract and retire target keys absent from it.
    #[serde(default)]
    pub delete_detection: bool,
    /// Fail the whole batch when any record is rejected as out of order.
    #[serde(default)]
    pub strict_batch_atomicity: bool,
    #[serde(default)]
    pub on_schema_error: SchemaErrorPolicy,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Blocking workers used to classify large batches.
    #[serde(default = "default_classification_workers")]
    pub classification_workers: usize,
    /// Wall-clock budget for one batch, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_time_budget_ms: Option<u64>,
}

impl MergeConfig {
    pub const DEFAULT_CLASSIFICATION_WORKERS: usize = 1;

    /// Creates an upsert configuration with default options.
    pub fn new(partition_by: Vec<String>, order_by: OrderBy) -> Self {
        Self {
            partition_by,
            order_by,
            mode: MergeMode::default(),
            allow_backfill: false,
            allow_schema_evolution: false,
            delete_detection: false,
            strict_batch_atomicity: false,
            on_schema_error: SchemaErrorPolicy::default(),
            retry: RetryConfig::default(),
            classification_workers: default_classification_workers(),
            batch_time_budget_ms: None,
        }
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_backfill(mut self, allow_backfill: bool) -> Self {
        self.allow_backfill = allow_backfill;
        self
    }

    pub fn with_schema_evolution(mut self, allow_schema_evolution: bool) -> Self {
        self.allow_schema_evolution = allow_schema_evolution;
        self
    }

    pub fn with_delete_detection(mut self, delete_detection: bool) -> Self {
        self.delete_detection = delete_detection;
        self
    }

    pub fn with_strict_batch_atomicity(mut self, strict: bool) -> Self {
        self.strict_batch_atomicity = strict;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_classification_workers(mut self, workers: usize) -> Self {
        self.classification_workers = workers;
        self
    }

    pub fn with_on_schema_error(mut self, policy: SchemaErrorPolicy) -> Self {
        self.on_schema_error = policy;
        self
    }

    pub fn with_batch_time_budget(mut self, budget: Duration) -> Self {
        self.batch_time_budget_ms = Some(budget.as_millis() as u64);
        self
    }

    pub fn batch_time_budget(&self) -> Option<Duration> {
        self.batch_time_budget_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    ///
    /// Column references are only checked for shape here; their presence in a batch is
    /// checked per batch.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.partition_by.is_empty() {
            return Err(ValidationError::EmptyColumnList("partition_by"));
        }

        let mut seen = HashSet::with_capacity(self.partition_by.len());
        for column in &self.partition_by {
            if column.trim().is_empty() {
                return Err(ValidationError::EmptyColumnName {
                    field: "partition_by",
                });
            }
            if !seen.insert(column.as_str()) {
                return Err(ValidationError::DuplicateColumn {
                    field: "partition_by",
                    column: column.clone(),
                });
            }
        }

        if self.order_by.column.trim().is_empty() {
            return Err(ValidationError::EmptyColumnName {
                field: "order_by.column",
            });
        }
        if seen.contains(self.order_by.column.as_str()) {
            return Err(ValidationError::OrderColumnInBusinessKey(
                self.order_by.column.clone(),
            ));
        }

        if self.allow_backfill && self.mode != MergeMode::Scd2 {
            return Err(ValidationError::InvalidFieldValue {
                field: "allow_backfill".to_string(),
                constraint: "only applies to `scd2` mode".to_string(),
            });
        }

        if self.classification_workers == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "classification_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.batch_time_budget_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch_time_budget_ms".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        self.retry.validate()
    }
}

fn default_classification_workers() -> usize {
    MergeConfig::DEFAULT_CLASSIFICATION_WORKERS
}
