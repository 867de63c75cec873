use std::collections::HashSet;

use tracing::info;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::types::{Batch, ColumnSchema, ColumnType, TableSchema, column_index};

/// Row problems reported per batch before the remaining ones are summarized.
const MAX_REPORTED_ROW_ERRORS: usize = 16;

/// Schema changes to apply to the target before a batch can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub added_columns: Vec<ColumnSchema>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
    }
}

/// Checks a batch schema against the target schema.
///
/// Evolution is additive only: new batch columns may be added to the target as nullable
/// columns, nothing is ever dropped or retyped.
#[derive(Debug, Clone, Copy)]
pub struct SchemaReconciler {
    allow_evolution: bool,
}

impl SchemaReconciler {
    pub fn new(allow_evolution: bool) -> Self {
        Self { allow_evolution }
    }

    pub fn reconcile(
        &self,
        batch_schema: &[ColumnSchema],
        target: &TableSchema,
        partition_by: &[String],
    ) -> EtlResult<SchemaPlan> {
        let mut errors: Vec<EtlError> = Vec::new();
        let mut plan = SchemaPlan::default();
        let mut seen = HashSet::with_capacity(batch_schema.len());

        for column in batch_schema {
            if !seen.insert(column.name.as_str()) {
                errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Duplicate batch column",
                    format!("column '{}' appears more than once", column.name)
                ));
                continue;
            }

            match target.column(&column.name) {
                Some(existing) if existing.typ != column.typ => errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Column type mismatch",
                    format!(
                        "column '{}' is {} in the batch and {} in table '{}'",
                        column.name, column.typ, existing.typ, target.name
                    )
                )),
                Some(_) => {}
                None if self.allow_evolution => plan.added_columns.push(ColumnSchema {
                    name: column.name.clone(),
                    typ: column.typ,
                    nullable: true,
                }),
                None => errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Column missing from target",
                    format!(
                        "column '{}' is not part of table '{}' and schema evolution is disabled",
                        column.name, target.name
                    )
                )),
            }
        }

        for column in &target.columns {
            if !column.nullable && column_index(batch_schema, &column.name).is_none() {
                errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Required column missing from batch",
                    format!("non-nullable column '{}' is absent from the batch", column.name)
                ));
            }
        }

        for key in partition_by {
            let typ = target
                .column(key)
                .or_else(|| batch_schema.iter().find(|c| &c.name == key))
                .map(|c| c.typ);

            match typ {
                Some(ColumnType::Float64) => errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Business key column cannot be a float",
                    format!("column '{key}' is float64")
                )),
                Some(_) => {}
                None => errors.push(etl_error!(
                    ErrorKind::SchemaError,
                    "Business key column missing",
                    format!("column '{key}' is neither in the batch nor in the target")
                )),
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        if !plan.is_empty() {
            info!(
                table = %target.name,
                columns = ?plan.added_columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "planned additive schema change"
            );
        }

        Ok(plan)
    }

    /// Checks every cell of the batch against its declared type and the target constraints.
    ///
    /// Expects `target` to already contain every batch column.
    pub fn validate_rows(
        &self,
        batch: &Batch,
        target: &TableSchema,
        partition_by: &[String],
    ) -> EtlResult<()> {
        let required: Vec<bool> = batch
            .schema
            .iter()
            .map(|column| {
                let nullable_in_target = target.column(&column.name).is_none_or(|c| c.nullable);
                !nullable_in_target || partition_by.contains(&column.name)
            })
            .collect();

        let mut errors: Vec<EtlError> = Vec::new();
        let mut suppressed = 0usize;
        let mut report = |error: EtlError| {
            if errors.len() < MAX_REPORTED_ROW_ERRORS {
                errors.push(error);
            } else {
                suppressed += 1;
            }
        };

        for (row_idx, row) in batch.rows.iter().enumerate() {
            if row.len() != batch.schema.len() {
                report(etl_error!(
                    ErrorKind::InvalidData,
                    "Row width does not match the batch schema",
                    format!(
                        "row {row_idx} has {} values, the schema has {} columns",
                        row.len(),
                        batch.schema.len()
                    )
                ));
                continue;
            }

            for ((column, cell), required) in batch.schema.iter().zip(row.values()).zip(&required) {
                if cell.is_null() {
                    if !*required {
                        continue;
                    }
                    let kind = if partition_by.contains(&column.name) {
                        ErrorKind::InvalidData
                    } else {
                        ErrorKind::SchemaError
                    };
                    report(etl_error!(
                        kind,
                        "Null value in a required column",
                        format!("row {row_idx} has NULL in column '{}'", column.name)
                    ));
                } else if !cell.fits(column.typ) {
                    report(etl_error!(
                        ErrorKind::InvalidData,
                        "Value does not match the column type",
                        format!(
                            "row {row_idx} column '{}' expects {}, got {cell}",
                            column.name, column.typ
                        )
                    ));
                }
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        if suppressed > 0 {
            errors.push(etl_error!(
                ErrorKind::InvalidData,
                "Further row errors suppressed",
                format!("{suppressed} more problems in batch {}", batch.offset)
            ));
        }

        Err(errors.into())
    }
}
