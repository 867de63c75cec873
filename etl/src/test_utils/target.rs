use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EtlResult;
use crate::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use crate::types::{BusinessKey, ColumnSchema, Offset, TableSchema, TargetSnapshot};

/// Target store wrapper that reports a conflict for the first `conflicts` applies.
///
/// Rejected applies never reach the wrapped store, as with a real concurrent writer whose
/// change bumped the table generation. Clones share the counters.
#[derive(Debug, Clone)]
pub struct ConflictingTargetStore<T> {
    inner: T,
    remaining_conflicts: Arc<AtomicUsize>,
    apply_calls: Arc<AtomicUsize>,
}

impl<T> ConflictingTargetStore<T> {
    pub fn new(inner: T, conflicts: usize) -> Self {
        Self {
            inner,
            remaining_conflicts: Arc::new(AtomicUsize::new(conflicts)),
            apply_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Number of [`TargetStore::apply_atomic`] calls, conflicting ones included.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

impl<T> TargetStore for ConflictingTargetStore<T>
where
    T: TargetStore + Send + Sync,
{
    async fn schema(&self) -> EtlResult<TableSchema> {
        self.inner.schema().await
    }

    async fn add_column(&self, column: ColumnSchema) -> EtlResult<()> {
        self.inner.add_column(column).await
    }

    async fn read_snapshot(&self, keys: &HashSet<BusinessKey>) -> EtlResult<TargetSnapshot> {
        self.inner.read_snapshot(keys).await
    }

    async fn current_keys(&self) -> EtlResult<HashSet<BusinessKey>> {
        self.inner.current_keys().await
    }

    async fn apply_atomic(&self, commit: AtomicCommit) -> EtlResult<ApplyOutcome> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        let conflict = self
            .remaining_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if conflict {
            return Ok(ApplyOutcome::Conflict {
                current_generation: commit.expected_generation + 1,
            });
        }

        self.inner.apply_atomic(commit).await
    }

    async fn last_applied_offset(&self) -> EtlResult<Option<Offset>> {
        self.inner.last_applied_offset().await
    }
}
