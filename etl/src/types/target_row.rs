use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{BusinessKey, Cell};

/// Validity metadata of one SCD2 version.
///
/// `effective_to` is open (`None`) only on the current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validity {
    pub version: u64,
    pub effective_from: Cell,
    pub effective_to: Option<Cell>,
    pub is_current: bool,
}

impl Validity {
    /// Validity of an open, current version.
    pub fn current(version: u64, effective_from: Cell) -> Self {
        Self {
            version,
            effective_from,
            effective_to: None,
            is_current: true,
        }
    }

    /// Validity of a version closed at `effective_to`.
    pub fn closed(version: u64, effective_from: Cell, effective_to: Cell) -> Self {
        Self {
            version,
            effective_from,
            effective_to: Some(effective_to),
            is_current: false,
        }
    }
}

/// A row of the target table, aligned with the target schema.
///
/// Upsert tables store rows without validity. SCD2 tables store every version of a key as a
/// separate row carrying its [`Validity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    pub key: BusinessKey,
    pub values: Vec<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
}

impl TargetRow {
    pub fn new(key: BusinessKey, values: Vec<Cell>) -> Self {
        Self {
            key,
            values,
            validity: None,
        }
    }

    pub fn versioned(key: BusinessKey, values: Vec<Cell>, validity: Validity) -> Self {
        Self {
            key,
            values,
            validity: Some(validity),
        }
    }

    /// Rows without validity are always current.
    pub fn is_current(&self) -> bool {
        self.validity.as_ref().is_none_or(|v| v.is_current)
    }

    pub fn version(&self) -> Option<u64> {
        self.validity.as_ref().map(|v| v.version)
    }
}

/// Point-in-time view of the target rows for a set of keys.
///
/// `generation` identifies the table state the snapshot was read from. An atomic apply is only
/// accepted when the table is still at that generation.
#[derive(Debug, Clone, Default)]
pub struct TargetSnapshot {
    generation: u64,
    rows: HashMap<BusinessKey, Vec<TargetRow>>,
}

impl TargetSnapshot {
    /// Creates a snapshot. Each history is expected sorted by ascending version.
    pub fn new(generation: u64, rows: HashMap<BusinessKey, Vec<TargetRow>>) -> Self {
        Self { generation, rows }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns every stored row of `key`, oldest version first.
    pub fn history(&self, key: &BusinessKey) -> &[TargetRow] {
        self.rows.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the current row of `key`, if any.
    pub fn current(&self, key: &BusinessKey) -> Option<&TargetRow> {
        self.history(key).iter().rev().find(|row| row.is_current())
    }

    pub fn keys(&self) -> impl Iterator<Item = &BusinessKey> {
        self.rows.keys()
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
