use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use config::shared::{OrderBy, SortDirection};

use crate::error::{ErrorKind, EtlResult};
use crate::types::{Batch, BusinessKey, Cell, ColumnSchema, TableRow, column_index};
use crate::{bail, etl_error};

/// A batch row together with its business key and ordering value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: BusinessKey,
    pub ordering_value: Cell,
    pub row: TableRow,
}

/// Collapses rows sharing a business key down to the most recent one.
///
/// The winner is the row ranked first by the ordering column in the configured direction.
/// Ties go to the row appearing later in the batch. The output keeps the order in which each
/// key first appeared.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    key_indices: Vec<usize>,
    order_index: usize,
    direction: SortDirection,
}

impl Deduplicator {
    /// Resolves the key and ordering columns against the batch schema.
    pub fn new(
        schema: &[ColumnSchema],
        partition_by: &[String],
        order_by: &OrderBy,
    ) -> EtlResult<Self> {
        let key_indices = partition_by
            .iter()
            .map(|column| {
                column_index(schema, column).ok_or_else(|| {
                    etl_error!(
                        ErrorKind::ConfigError,
                        "Business key column missing from batch",
                        format!("column '{column}' is not part of the batch schema")
                    )
                })
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let Some(order_index) = column_index(schema, &order_by.column) else {
            bail!(
                ErrorKind::ConfigError,
                "Ordering column missing from batch",
                format!(
                    "column '{}' is not part of the batch schema",
                    order_by.column
                )
            );
        };

        Ok(Self {
            key_indices,
            order_index,
            direction: order_by.direction,
        })
    }

    pub fn deduplicate(&self, rows: Vec<TableRow>) -> EtlResult<Vec<Record>> {
        let mut records: Vec<Record> = Vec::with_capacity(rows.len());
        let mut slots: HashMap<BusinessKey, usize> = HashMap::with_capacity(rows.len());

        for row in rows {
            let key = BusinessKey::from_row(row.values(), &self.key_indices);
            let ordering_value = row.get(self.order_index).clone();

            match slots.entry(key) {
                Entry::Vacant(entry) => {
                    let key = entry.key().clone();
                    entry.insert(records.len());
                    records.push(Record {
                        key,
                        ordering_value,
                        row,
                    });
                }
                Entry::Occupied(entry) => {
                    let current = &mut records[*entry.get()];
                    if self.supersedes(&ordering_value, &current.ordering_value, &current.key)? {
                        current.ordering_value = ordering_value;
                        current.row = row;
                    }
                }
            }
        }

        Ok(records)
    }

    /// Returns whether a later row with ordering value `candidate` replaces the kept one.
    fn supersedes(&self, candidate: &Cell, kept: &Cell, key: &BusinessKey) -> EtlResult<bool> {
        let Some(ordering) = candidate.try_cmp(kept) else {
            bail!(
                ErrorKind::InvalidData,
                "Ordering values are not comparable",
                format!("key {key} has ordering values {kept} and {candidate}")
            );
        };

        let wins = match self.direction {
            SortDirection::Descending => ordering != Ordering::Less,
            SortDirection::Ascending => ordering != Ordering::Greater,
        };

        Ok(wins)
    }
}

/// Deduplicates a whole batch in one call.
pub fn deduplicate(
    batch: Batch,
    partition_by: &[String],
    order_by: &OrderBy,
) -> EtlResult<Vec<Record>> {
    Deduplicator::new(&batch.schema, partition_by, order_by)?.deduplicate(batch.rows)
}
