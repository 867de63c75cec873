use crate::merge::{ChangeSet, ColumnMapping, MutationCounts, MutationPlan, RowMutation};
use crate::types::TargetRow;

/// Turns classified changes into in-place mutations for tables without history.
pub struct MergePlanner<'a> {
    mapping: &'a ColumnMapping,
}

impl<'a> MergePlanner<'a> {
    pub fn new(mapping: &'a ColumnMapping) -> Self {
        Self { mapping }
    }

    pub fn plan(&self, change_set: ChangeSet) -> MutationPlan {
        let ChangeSet {
            inserts,
            updates,
            deletes,
            ..
        } = change_set;

        let counts = MutationCounts {
            inserted: inserts.len() as u64,
            updated: updates.len() as u64,
            deleted: deletes.len() as u64,
            backfilled: 0,
        };

        let mut mutations = Vec::with_capacity(inserts.len() + updates.len() + deletes.len());

        for record in inserts {
            let values = self.mapping.project(&record.row, None);
            mutations.push(RowMutation::Insert(TargetRow::new(record.key, values)));
        }

        for update in updates {
            let values = self
                .mapping
                .project(&update.record.row, Some(&update.current.values));
            mutations.push(RowMutation::Overwrite {
                key: update.record.key,
                values,
            });
        }

        for row in deletes {
            mutations.push(RowMutation::Delete { key: row.key });
        }

        MutationPlan {
            mutations,
            counts,
            rejected: Vec::new(),
        }
    }
}
