use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ColumnSchema, TableRow, column_index};

/// Monotonically increasing position of a batch in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(u64);

impl Offset {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of change records delivered together under one offset.
///
/// Rows follow the column order of `schema`. The schema is the batch's own and may differ from
/// the target table's.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub offset: Offset,
    pub schema: Vec<ColumnSchema>,
    pub rows: Vec<TableRow>,
}

impl Batch {
    pub fn new(offset: impl Into<Offset>, schema: Vec<ColumnSchema>, rows: Vec<TableRow>) -> Self {
        Self {
            offset: offset.into(),
            schema,
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        column_index(&self.schema, name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
