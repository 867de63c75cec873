use std::collections::HashSet;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::merge::Record;
use crate::types::{
    BusinessKey, Cell, ColumnSchema, TableRow, TableSchema, TargetRow, TargetSnapshot,
    column_index,
};

/// How batch columns line up with target columns.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    /// Batch position of each target column, if the batch carries it.
    batch_index: Vec<Option<usize>>,
    /// `(target, batch)` positions of the non-key columns present on both sides.
    compared: Vec<(usize, usize)>,
    /// Target position of the ordering column.
    ordering_index: Option<usize>,
}

impl ColumnMapping {
    pub fn new(
        target: &TableSchema,
        batch_schema: &[ColumnSchema],
        partition_by: &[String],
    ) -> EtlResult<Self> {
        let key_indices = partition_by
            .iter()
            .map(|column| {
                target.column_index(column).ok_or_else(|| {
                    etl_error!(
                        ErrorKind::SchemaError,
                        "Business key column missing from target",
                        format!("column '{column}' is not part of table '{}'", target.name)
                    )
                })
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let batch_index: Vec<Option<usize>> = target
            .columns
            .iter()
            .map(|column| column_index(batch_schema, &column.name))
            .collect();

        let compared = batch_index
            .iter()
            .enumerate()
            .filter(|(target_idx, _)| !key_indices.contains(target_idx))
            .filter_map(|(target_idx, batch_idx)| batch_idx.map(|b| (target_idx, b)))
            .collect();

        Ok(Self {
            batch_index,
            compared,
            ordering_index: None,
        })
    }

    /// Records which target column holds the ordering value.
    pub fn with_ordering_column(mut self, target: &TableSchema, column: &str) -> Self {
        self.ordering_index = target.column_index(column);
        self
    }

    /// Builds target-aligned values from a batch row.
    ///
    /// Target columns missing from the batch take their value from `base` when given, and
    /// are null otherwise.
    pub fn project(&self, row: &TableRow, base: Option<&[Cell]>) -> Vec<Cell> {
        self.batch_index
            .iter()
            .enumerate()
            .map(|(target_idx, batch_idx)| match batch_idx {
                Some(batch_idx) => row.get(*batch_idx).clone(),
                None => base
                    .and_then(|values| values.get(target_idx))
                    .cloned()
                    .unwrap_or(Cell::Null),
            })
            .collect()
    }

    /// Returns whether any compared column of `row` differs from the stored `values`.
    pub fn differs(&self, row: &TableRow, values: &[Cell]) -> bool {
        self.compared
            .iter()
            .any(|&(target_idx, batch_idx)| Self::cell_differs(row, values, target_idx, batch_idx))
    }

    /// Like [`ColumnMapping::differs`], without looking at the ordering column.
    pub fn differs_ignoring_ordering(&self, row: &TableRow, values: &[Cell]) -> bool {
        self.compared
            .iter()
            .filter(|(target_idx, _)| Some(*target_idx) != self.ordering_index)
            .any(|&(target_idx, batch_idx)| Self::cell_differs(row, values, target_idx, batch_idx))
    }

    fn cell_differs(row: &TableRow, values: &[Cell], target_idx: usize, batch_idx: usize) -> bool {
        let stored = values.get(target_idx).unwrap_or(&Cell::Null);
        !row.get(batch_idx).null_safe_eq(stored)
    }
}

/// A record replacing the current row of its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub current: TargetRow,
    pub record: Record,
}

/// Classified changes of one batch. Every batch key lands in exactly one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub inserts: Vec<Record>,
    pub updates: Vec<Update>,
    pub unchanged: Vec<BusinessKey>,
    pub deletes: Vec<TargetRow>,
}

impl ChangeSet {
    /// Appends the partitions of `other`, keeping their order.
    pub fn extend(&mut self, other: ChangeSet) {
        self.inserts.extend(other.inserts);
        self.updates.extend(other.updates);
        self.unchanged.extend(other.unchanged);
        self.deletes.extend(other.deletes);
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.unchanged.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sorts deduplicated records into inserts, updates and unchanged keys against a snapshot.
pub struct ChangeClassifier<'a> {
    snapshot: &'a TargetSnapshot,
    mapping: &'a ColumnMapping,
}

impl<'a> ChangeClassifier<'a> {
    pub fn new(snapshot: &'a TargetSnapshot, mapping: &'a ColumnMapping) -> Self {
        Self { snapshot, mapping }
    }

    pub fn classify(&self, records: &[Record]) -> ChangeSet {
        let mut change_set = ChangeSet::default();

        for record in records {
            match self.snapshot.current(&record.key) {
                None => change_set.inserts.push(record.clone()),
                Some(current) if self.mapping.differs(&record.row, &current.values) => {
                    change_set.updates.push(Update {
                        current: current.clone(),
                        record: record.clone(),
                    });
                }
                Some(_) => change_set.unchanged.push(record.key.clone()),
            }
        }

        change_set
    }

    /// Returns the current rows of every snapshot key missing from the batch.
    ///
    /// Only meaningful when the batch is a complete extract and the snapshot was read for
    /// every currently active key.
    pub fn detect_deletes(&self, batch_keys: &HashSet<BusinessKey>) -> Vec<TargetRow> {
        self.snapshot
            .keys()
            .filter(|key| !batch_keys.contains(*key))
            .filter_map(|key| self.snapshot.current(key).cloned())
            .collect()
    }
}
