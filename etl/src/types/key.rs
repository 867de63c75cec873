use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::types::Cell;

/// Values of the business key columns identifying one logical entity.
///
/// Composite keys keep their column order, so `(1, 'a')` and `('a', 1)` are different keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey {
    values: Vec<Cell>,
}

// Float key columns are rejected during schema reconciliation, so NaN never reaches a key.
impl Eq for BusinessKey {}

impl BusinessKey {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Extracts the key from a row given the positions of the key columns.
    pub fn from_row(row: &[Cell], key_indices: &[usize]) -> Self {
        let values = key_indices
            .iter()
            .map(|&idx| row.get(idx).cloned().unwrap_or(Cell::Null))
            .collect();

        Self { values }
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Returns whether any key component is null.
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Cell::is_null)
    }
}

impl Hash for BusinessKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.values {
            cell_hash(value, state);
        }
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

fn cell_hash<H: Hasher>(cell: &Cell, state: &mut H) {
    std::mem::discriminant(cell).hash(state);

    match cell {
        Cell::Null => {}
        Cell::Bool(v) => v.hash(state),
        Cell::I64(v) => v.hash(state),
        Cell::F64(v) => v.to_bits().hash(state),
        Cell::String(v) => v.hash(state),
        Cell::Date(v) => v.hash(state),
        Cell::Timestamp(v) => v.hash(state),
        Cell::TimestampTz(v) => v.hash(state),
        Cell::Json(v) => v.to_string().hash(state),
        Cell::Bytes(v) => v.hash(state),
    }
}
