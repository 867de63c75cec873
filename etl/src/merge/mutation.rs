use crate::types::{BusinessKey, Cell, TargetRow};

/// A single row-level change to the target table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMutation {
    /// Adds a row. In SCD2 tables this opens a new version.
    Insert(TargetRow),
    /// Replaces the values of the only row of a key in place.
    Overwrite { key: BusinessKey, values: Vec<Cell> },
    /// Removes every row of a key.
    Delete { key: BusinessKey },
    /// Closes the current version of a key at `effective_to`.
    CloseVersion {
        key: BusinessKey,
        version: u64,
        effective_to: Cell,
    },
    /// Replaces the whole history of a key.
    ReplaceHistory { key: BusinessKey, rows: Vec<TargetRow> },
}

impl RowMutation {
    pub fn key(&self) -> &BusinessKey {
        match self {
            RowMutation::Insert(row) => &row.key,
            RowMutation::Overwrite { key, .. }
            | RowMutation::Delete { key }
            | RowMutation::CloseVersion { key, .. }
            | RowMutation::ReplaceHistory { key, .. } => key,
        }
    }
}

/// A record refused because it is not newer than the current version of its key.
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfOrderRecord {
    pub key: BusinessKey,
    pub ordering_value: Cell,
    pub current_from: Cell,
}

/// Number of logical changes a plan carries, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub backfilled: u64,
}

impl MutationCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.backfilled
    }
}

/// Ordered mutations produced for one batch, applied in one atomic call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationPlan {
    pub mutations: Vec<RowMutation>,
    pub counts: MutationCounts,
    pub rejected: Vec<OutOfOrderRecord>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}
