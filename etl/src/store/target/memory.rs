use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::EtlResult;
use crate::store::target::state::TableState;
use crate::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use crate::types::{BusinessKey, ColumnSchema, Offset, TableSchema, TargetRow, TargetSnapshot};

/// In-memory target table for tests and development.
///
/// Clones share the same table, so a clone can be kept to inspect what a pipeline wrote.
#[derive(Debug, Clone)]
pub struct MemoryTargetStore {
    inner: Arc<Mutex<TableState>>,
}

impl MemoryTargetStore {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableState::new(schema))),
        }
    }

    /// Returns every stored row, grouped by key and ordered by version.
    pub async fn rows(&self) -> Vec<TargetRow> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<TargetRow> = inner.rows().cloned().collect();
        rows.sort_by(|a, b| {
            a.key
                .to_string()
                .cmp(&b.key.to_string())
                .then(a.version().cmp(&b.version()))
        });

        rows
    }

    /// Returns the stored versions of `key`, oldest first.
    pub async fn history(&self, key: &BusinessKey) -> Vec<TargetRow> {
        self.inner.lock().await.history(key).to_vec()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }
}

impl TargetStore for MemoryTargetStore {
    async fn schema(&self) -> EtlResult<TableSchema> {
        Ok(self.inner.lock().await.schema.clone())
    }

    async fn add_column(&self, column: ColumnSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.add_column(column)?;

        Ok(())
    }

    async fn read_snapshot(&self, keys: &HashSet<BusinessKey>) -> EtlResult<TargetSnapshot> {
        Ok(self.inner.lock().await.snapshot(keys))
    }

    async fn current_keys(&self) -> EtlResult<HashSet<BusinessKey>> {
        Ok(self.inner.lock().await.current_keys())
    }

    async fn apply_atomic(&self, commit: AtomicCommit) -> EtlResult<ApplyOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.generation != commit.expected_generation {
            return Ok(ApplyOutcome::Conflict {
                current_generation: inner.generation,
            });
        }

        let mutations = commit.mutations.len();
        let staged = inner.stage(commit.mutations)?;
        inner.install(staged, commit.offset);

        debug!(
            offset = %commit.offset,
            mutations,
            generation = inner.generation,
            "applied mutations to memory target"
        );

        Ok(ApplyOutcome::Committed {
            generation: inner.generation,
        })
    }

    async fn last_applied_offset(&self) -> EtlResult<Option<Offset>> {
        Ok(self.inner.lock().await.applied_offset)
    }
}
