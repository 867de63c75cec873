use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::merge::{
    ChangeSet, ColumnMapping, MutationPlan, OutOfOrderRecord, Record, RowMutation, Update,
};
use crate::types::{BusinessKey, Cell, TargetRow, TargetSnapshot, Validity};

/// Turns classified changes into history-preserving mutations.
///
/// Updates close the current version of a key and open the next one. Records that are not
/// newer than the current version are either rejected or, with backfill enabled, spliced
/// into the existing history.
pub struct Scd2Applier<'a> {
    mapping: &'a ColumnMapping,
    snapshot: &'a TargetSnapshot,
    processing_time: Cell,
    allow_backfill: bool,
}

impl<'a> Scd2Applier<'a> {
    /// `processing_time` stands in for missing ordering values and closes deleted keys.
    pub fn new(
        mapping: &'a ColumnMapping,
        snapshot: &'a TargetSnapshot,
        processing_time: Cell,
    ) -> Self {
        Self {
            mapping,
            snapshot,
            processing_time,
            allow_backfill: false,
        }
    }

    pub fn with_backfill(mut self, allow_backfill: bool) -> Self {
        self.allow_backfill = allow_backfill;
        self
    }

    pub fn apply(&self, change_set: ChangeSet) -> EtlResult<MutationPlan> {
        let mut plan = MutationPlan::default();

        for record in change_set.inserts {
            self.open_first_version(record, &mut plan)?;
        }

        for update in change_set.updates {
            self.supersede(update, &mut plan)?;
        }

        for row in change_set.deletes {
            let validity = version_metadata(&row)?;
            plan.mutations.push(RowMutation::CloseVersion {
                version: validity.version,
                key: row.key,
                effective_to: self.processing_time.clone(),
            });
            plan.counts.deleted += 1;
        }

        debug!(
            inserted = plan.counts.inserted,
            updated = plan.counts.updated,
            deleted = plan.counts.deleted,
            backfilled = plan.counts.backfilled,
            rejected = plan.rejected.len(),
            "planned scd2 mutations"
        );

        Ok(plan)
    }

    fn effective_from(&self, record: &Record) -> Cell {
        if record.ordering_value.is_null() {
            self.processing_time.clone()
        } else {
            record.ordering_value.clone()
        }
    }

    /// Opens the first version of a key, or reopens a key whose history is all closed.
    ///
    /// A reopened key starts where its last version ended so the chain has no gap.
    fn open_first_version(&self, record: Record, plan: &mut MutationPlan) -> EtlResult<()> {
        let (version, effective_from) = match self.snapshot.history(&record.key).last() {
            Some(last) => {
                let last = version_metadata(last)?;
                let effective_from = match &last.effective_to {
                    Some(effective_to) => effective_to.clone(),
                    None => bail!(
                        ErrorKind::InvalidState,
                        "Inserted key already has an open version",
                        format!("key {} version {}", record.key, last.version)
                    ),
                };
                debug!(key = %record.key, version = last.version + 1, "reopening closed key");

                (last.version + 1, effective_from)
            }
            None => (1, self.effective_from(&record)),
        };

        let validity = Validity::current(version, effective_from);
        let values = self.mapping.project(&record.row, None);

        plan.mutations
            .push(RowMutation::Insert(TargetRow::versioned(record.key, values, validity)));
        plan.counts.inserted += 1;

        Ok(())
    }

    fn supersede(&self, update: Update, plan: &mut MutationPlan) -> EtlResult<()> {
        let Update { current, record } = update;
        let validity = version_metadata(&current)?;
        let effective_from = self.effective_from(&record);

        if compare(&effective_from, &validity.effective_from, &record.key)? == Ordering::Greater {
            let values = self.mapping.project(&record.row, Some(&current.values));
            plan.mutations.push(RowMutation::CloseVersion {
                key: record.key.clone(),
                version: validity.version,
                effective_to: effective_from.clone(),
            });
            plan.mutations.push(RowMutation::Insert(TargetRow::versioned(
                record.key,
                values,
                Validity::current(validity.version + 1, effective_from),
            )));
            plan.counts.updated += 1;

            return Ok(());
        }

        if !self.allow_backfill {
            warn!(
                key = %record.key,
                ordering_value = %effective_from,
                current_from = %validity.effective_from,
                "rejecting out of order record"
            );
            plan.rejected.push(OutOfOrderRecord {
                key: record.key,
                ordering_value: effective_from,
                current_from: validity.effective_from.clone(),
            });

            return Ok(());
        }

        let history = self.snapshot.history(&record.key);
        if let Some(rows) = self.splice(&record, effective_from, history)? {
            debug!(key = %record.key, versions = rows.len(), "backfilled history");
            plan.mutations.push(RowMutation::ReplaceHistory {
                key: record.key,
                rows,
            });
            plan.counts.backfilled += 1;
        }

        Ok(())
    }

    /// Splices a late record into `history` at `at`.
    ///
    /// Returns the rewritten history, or [`None`] when the record would not change it.
    fn splice(
        &self,
        record: &Record,
        at: Cell,
        history: &[TargetRow],
    ) -> EtlResult<Option<Vec<TargetRow>>> {
        let mut rows = history.to_vec();

        let mut containing = None;
        for (idx, row) in rows.iter().enumerate() {
            let from = &version_metadata(row)?.effective_from;
            if compare(from, &at, &record.key)? == Ordering::Greater {
                break;
            }
            containing = Some(idx);
        }

        match containing {
            Some(idx) => {
                let validity = version_metadata(&rows[idx])?.clone();

                if compare(&validity.effective_from, &at, &record.key)? == Ordering::Equal {
                    if !self.mapping.differs(&record.row, &rows[idx].values) {
                        return Ok(None);
                    }
                    rows[idx].values = self.mapping.project(&record.row, Some(&rows[idx].values));
                } else {
                    if !self
                        .mapping
                        .differs_ignoring_ordering(&record.row, &rows[idx].values)
                    {
                        return Ok(None);
                    }
                    if let Some(split) = rows[idx].validity.as_mut() {
                        split.effective_to = Some(at.clone());
                        split.is_current = false;
                    }
                    let effective_to = validity.effective_to.clone();

                    let values = self.mapping.project(&record.row, Some(&rows[idx].values));
                    let spliced = TargetRow::versioned(
                        record.key.clone(),
                        values,
                        Validity {
                            version: 0,
                            effective_from: at,
                            is_current: effective_to.is_none(),
                            effective_to,
                        },
                    );
                    rows.insert(idx + 1, spliced);
                }
            }
            None => {
                let Some(first) = rows.first_mut() else {
                    bail!(
                        ErrorKind::InvalidState,
                        "Cannot backfill a key without history",
                        format!("key {}", record.key)
                    );
                };

                if !self
                    .mapping
                    .differs_ignoring_ordering(&record.row, &first.values)
                {
                    if let Some(validity) = first.validity.as_mut() {
                        validity.effective_from = at;
                    }
                } else {
                    let next_from = version_metadata(first)?.effective_from.clone();
                    let values = self.mapping.project(&record.row, Some(&first.values));
                    rows.insert(
                        0,
                        TargetRow::versioned(
                            record.key.clone(),
                            values,
                            Validity::closed(0, at, next_from),
                        ),
                    );
                }
            }
        }

        for (idx, row) in rows.iter_mut().enumerate() {
            if let Some(validity) = row.validity.as_mut() {
                validity.version = idx as u64 + 1;
            }
        }

        Ok(Some(rows))
    }
}

fn version_metadata(row: &TargetRow) -> EtlResult<&Validity> {
    match row.validity.as_ref() {
        Some(validity) => Ok(validity),
        None => bail!(
            ErrorKind::InvalidState,
            "Target row has no version metadata",
            format!("key {} is stored without validity columns", row.key)
        ),
    }
}

fn compare(left: &Cell, right: &Cell, key: &BusinessKey) -> EtlResult<Ordering> {
    match left.try_cmp(right) {
        Some(ordering) => Ok(ordering),
        None => bail!(
            ErrorKind::InvalidData,
            "Ordering values are not comparable",
            format!("key {key} compares {left} against {right}")
        ),
    }
}
