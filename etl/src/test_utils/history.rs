use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{BusinessKey, TargetRow};

/// Groups rows by key, each history sorted by version.
pub fn histories(rows: &[TargetRow]) -> HashMap<BusinessKey, Vec<TargetRow>> {
    let mut histories: HashMap<BusinessKey, Vec<TargetRow>> = HashMap::new();
    for row in rows {
        histories.entry(row.key.clone()).or_default().push(row.clone());
    }
    for history in histories.values_mut() {
        history.sort_by_key(|row| row.version().unwrap_or_default());
    }

    histories
}

/// Asserts the structural guarantees of SCD2 histories.
///
/// For every key: at most one current row, versions numbered `1..=n` in `effective_from`
/// order, only the last version open, and every closed version ending exactly where the
/// next one starts.
pub fn assert_history_invariants(rows: &[TargetRow]) {
    for (key, history) in histories(rows) {
        let current = history.iter().filter(|row| row.is_current()).count();
        assert!(current <= 1, "key {key} has {current} current rows");

        let versions: Vec<_> = history.iter().map(TargetRow::version).collect();
        let expected: Vec<_> = (1..=history.len() as u64).map(Some).collect();
        assert_eq!(versions, expected, "key {key} is not numbered 1..=n");

        for window in history.windows(2) {
            let (older, newer) = (&window[0], &window[1]);
            let (Some(older), Some(newer)) = (&older.validity, &newer.validity) else {
                unreachable!("versions were checked above");
            };

            assert!(
                !older.is_current,
                "key {key} version {} is current but not the latest",
                older.version
            );
            assert_eq!(
                older.effective_to.as_ref(),
                Some(&newer.effective_from),
                "key {key} version {} does not end where version {} starts",
                older.version,
                newer.version
            );
        }

        for row in &history {
            if let Some(validity) = &row.validity
                && let Some(effective_to) = &validity.effective_to
            {
                assert_ne!(
                    validity.effective_from.try_cmp(effective_to),
                    Some(Ordering::Greater),
                    "key {key} version {} ends before it starts",
                    validity.version
                );
            }
        }
    }
}
