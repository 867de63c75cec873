use crate::types::Cell;

/// A row of a batch, with one [`Cell`] per batch column in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Returns the row values in column order.
    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Returns the value at column position `index`, [`Cell::Null`] when out of range.
    pub fn get(&self, index: usize) -> &Cell {
        self.values.get(index).unwrap_or(&Cell::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }
}

impl From<Vec<Cell>> for TableRow {
    fn from(values: Vec<Cell>) -> Self {
        Self::new(values)
    }
}
