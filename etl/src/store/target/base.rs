use std::collections::HashSet;
use std::future::Future;

use crate::error::EtlResult;
use crate::merge::RowMutation;
use crate::types::{BusinessKey, ColumnSchema, Offset, TableSchema, TargetSnapshot};

/// Mutations of one batch together with the state they were planned against.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicCommit {
    /// Generation of the snapshot the mutations were planned from.
    pub expected_generation: u64,
    /// Offset of the batch, stored by the target in the same atomic unit as the rows.
    pub offset: Offset,
    pub mutations: Vec<RowMutation>,
}

/// Result of an [`TargetStore::apply_atomic`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every mutation and the offset tag were applied.
    Committed { generation: u64 },
    /// The table changed since the snapshot was read. Nothing was applied.
    Conflict { current_generation: u64 },
}

/// Trait for the table batches are merged into.
///
/// [`TargetStore`] implementations own the durable rows of one table. Every batch is written
/// through a single [`TargetStore::apply_atomic`] call: either all of its mutations become
/// visible together with its offset tag, or none do.
///
/// Implementations should ensure thread-safety and handle concurrent access to the data.
pub trait TargetStore {
    /// Returns the current schema of the table.
    fn schema(&self) -> impl Future<Output = EtlResult<TableSchema>> + Send;

    /// Appends a nullable column. Existing rows read as null for it.
    fn add_column(&self, column: ColumnSchema) -> impl Future<Output = EtlResult<()>> + Send;

    /// Returns every stored version of the requested keys.
    fn read_snapshot(
        &self,
        keys: &HashSet<BusinessKey>,
    ) -> impl Future<Output = EtlResult<TargetSnapshot>> + Send;

    /// Returns the keys that currently have an active row.
    fn current_keys(&self) -> impl Future<Output = EtlResult<HashSet<BusinessKey>>> + Send;

    /// Applies all mutations of a batch and records its offset, atomically.
    ///
    /// Returns [`ApplyOutcome::Conflict`] without applying anything when the table is no
    /// longer at `commit.expected_generation`.
    fn apply_atomic(
        &self,
        commit: AtomicCommit,
    ) -> impl Future<Output = EtlResult<ApplyOutcome>> + Send;

    /// Returns the offset carried by the last successful [`TargetStore::apply_atomic`].
    fn last_applied_offset(&self) -> impl Future<Output = EtlResult<Option<Offset>>> + Send;
}
