use chrono::{TimeZone, Utc};
use etl::error::ErrorKind;
use etl::pipeline::{BatchOutcome, BatchReport};
use etl::test_utils::history::assert_history_invariants;
use etl::test_utils::pipeline::memory_pipeline;
use etl::test_utils::table::{customer_key, customers_batch_of, customers_columns, scd2_config};
use etl::types::{Batch, Cell, TableRow, TargetRow, Validity};
use telemetry::tracing::init_test_tracing;

fn applied(outcome: BatchOutcome) -> BatchReport {
    match outcome {
        BatchOutcome::Applied(report) => report,
        other => panic!("expected an applied batch, got {other:?}"),
    }
}

fn version(id: i64, name: &str, updated_at: i64, validity: Validity) -> TargetRow {
    TargetRow::versioned(
        customer_key(id),
        vec![Cell::I64(id), Cell::from(name), Cell::I64(updated_at)],
        validity,
    )
}

#[tokio::test]
async fn update_closes_the_current_version_and_opens_the_next() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(scd2_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch(customers_batch_of(2, &[(1, "B", 2)]))
            .await
            .unwrap(),
    );
    assert_eq!(report.updated, 1);

    let history = stores.target.history(&customer_key(1)).await;
    assert_eq!(
        history,
        vec![
            version(1, "A", 1, Validity::closed(1, Cell::I64(1), Cell::I64(2))),
            version(1, "B", 2, Validity::current(2, Cell::I64(2))),
        ]
    );
    assert_history_invariants(&stores.target.rows().await);
}

#[tokio::test]
async fn many_updates_keep_one_current_version_per_key() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(scd2_config()).await;

    for offset in 1..=5u64 {
        let t = offset as i64 * 10;
        let (a, c) = (format!("a{offset}"), format!("c{offset}"));
        pipeline
            .process_batch(customers_batch_of(
                offset,
                &[(1, a.as_str(), t), (2, "fixed", 10), (3, c.as_str(), t)],
            ))
            .await
            .unwrap();
    }

    let rows = stores.target.rows().await;
    assert_history_invariants(&rows);
    assert_eq!(stores.target.history(&customer_key(1)).await.len(), 5);
    assert_eq!(stores.target.history(&customer_key(2)).await.len(), 1);
    assert_eq!(stores.target.history(&customer_key(3)).await.len(), 5);
}

#[tokio::test]
async fn late_records_are_rejected_and_the_rest_of_the_batch_applies() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(scd2_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 5)]))
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch(customers_batch_of(2, &[(1, "late", 3), (2, "new", 3)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].key, customer_key(1));
    assert_eq!(report.rejected[0].ordering_value, Cell::I64(3));
    assert_eq!(report.rejected[0].current_from, Cell::I64(5));
    assert_eq!(report.inserted, 1);

    assert_eq!(
        stores.target.history(&customer_key(1)).await,
        vec![version(1, "A", 5, Validity::current(1, Cell::I64(5)))]
    );
    assert_eq!(
        pipeline.checkpoints().committed_offset().map(|o| o.value()),
        Some(2)
    );
}

#[tokio::test]
async fn strict_atomicity_fails_the_whole_batch_on_a_late_record() {
    init_test_tracing();
    let config = scd2_config().with_strict_batch_atomicity(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 5)]))
        .await
        .unwrap();
    let err = pipeline
        .process_batch(customers_batch_of(2, &[(1, "late", 3), (2, "new", 3)]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    assert!(stores.target.history(&customer_key(2)).await.is_empty());
    assert_eq!(
        pipeline.checkpoints().committed_offset().map(|o| o.value()),
        Some(1)
    );
    assert!(pipeline.checkpoints().pending().is_none());
}

#[tokio::test]
async fn backfill_splits_the_version_containing_the_late_record() {
    init_test_tracing();
    let config = scd2_config().with_backfill(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    pipeline
        .process_batch(customers_batch_of(2, &[(1, "C", 10)]))
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch(customers_batch_of(3, &[(1, "B", 5)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.backfilled, 1);
    assert!(report.rejected.is_empty());

    let history = stores.target.history(&customer_key(1)).await;
    assert_eq!(
        history,
        vec![
            version(1, "A", 1, Validity::closed(1, Cell::I64(1), Cell::I64(5))),
            version(1, "B", 5, Validity::closed(2, Cell::I64(5), Cell::I64(10))),
            version(1, "C", 10, Validity::current(3, Cell::I64(10))),
        ]
    );
    assert_history_invariants(&stores.target.rows().await);
}

#[tokio::test]
async fn backfill_before_the_first_version_prepends_history() {
    init_test_tracing();
    let config = scd2_config().with_backfill(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 5)]))
        .await
        .unwrap();
    pipeline
        .process_batch(customers_batch_of(2, &[(1, "early", 2)]))
        .await
        .unwrap();

    let history = stores.target.history(&customer_key(1)).await;
    assert_eq!(
        history,
        vec![
            version(1, "early", 2, Validity::closed(1, Cell::I64(2), Cell::I64(5))),
            version(1, "A", 5, Validity::current(2, Cell::I64(5))),
        ]
    );
    assert_history_invariants(&stores.target.rows().await);
}

#[tokio::test]
async fn backfill_with_the_values_of_the_containing_version_is_a_no_op() {
    init_test_tracing();
    let config = scd2_config().with_backfill(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    pipeline
        .process_batch(customers_batch_of(2, &[(1, "C", 10)]))
        .await
        .unwrap();
    let before = stores.target.rows().await;

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(3, &[(1, "A", 5)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.backfilled, 0);
    assert_eq!(stores.target.rows().await, before);
}

#[tokio::test]
async fn delete_detection_closes_missing_keys_at_processing_time() {
    init_test_tracing();
    let config = scd2_config().with_delete_detection(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    pipeline
        .process_batch_at(customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]), now)
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch_at(customers_batch_of(2, &[(1, "A", 1)]), now)
            .await
            .unwrap(),
    );
    assert_eq!(report.deleted, 1);

    let closed_at = Cell::I64(now.timestamp_millis());
    assert_eq!(
        stores.target.history(&customer_key(2)).await,
        vec![version(2, "B", 1, Validity::closed(1, Cell::I64(1), closed_at.clone()))]
    );

    // The key reappears and its next version starts where the closed one ended.
    let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    pipeline
        .process_batch_at(
            customers_batch_of(3, &[(1, "A", 1), (2, "B", later.timestamp_millis())]),
            later,
        )
        .await
        .unwrap();

    let history = stores.target.history(&customer_key(2)).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].version(), Some(2));
    assert!(history[1].is_current());
    assert_eq!(
        history[1].validity.as_ref().map(|v| &v.effective_from),
        Some(&closed_at)
    );
    assert_history_invariants(&stores.target.rows().await);
}

#[tokio::test]
async fn key_missing_from_one_extract_comes_back_without_overlapping_versions() {
    init_test_tracing();
    let config = scd2_config().with_delete_detection(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let closed_at = Cell::I64(now.timestamp_millis());

    let full = [(1, "A", 1), (2, "B", 1)];
    pipeline
        .process_batch_at(customers_batch_of(1, &full), now)
        .await
        .unwrap();
    pipeline
        .process_batch_at(customers_batch_of(2, &[(1, "A", 1)]), now)
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch_at(customers_batch_of(3, &full), now)
            .await
            .unwrap(),
    );

    assert_eq!(report.inserted, 1);
    assert!(report.rejected.is_empty());
    assert_eq!(
        stores.target.history(&customer_key(2)).await,
        vec![
            version(2, "B", 1, Validity::closed(1, Cell::I64(1), closed_at.clone())),
            version(2, "B", 1, Validity::current(2, closed_at)),
        ]
    );
    assert_history_invariants(&stores.target.rows().await);
}

#[tokio::test]
async fn same_content_at_a_new_offset_adds_no_versions() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(scd2_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]))
        .await
        .unwrap();
    pipeline
        .process_batch(customers_batch_of(2, &[(1, "A2", 2), (2, "B", 1)]))
        .await
        .unwrap();
    let after = stores.target.rows().await;

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(3, &[(1, "A2", 2), (2, "B", 1)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.unchanged, 2);
    assert_eq!(report.inserted + report.updated + report.deleted, 0);
    assert_eq!(stores.target.rows().await, after);
    assert_history_invariants(&after);
}

#[tokio::test]
async fn null_ordering_value_uses_processing_time() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(scd2_config()).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let batch = Batch::new(
        1,
        customers_columns(),
        vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::from("A"),
            Cell::Null,
        ])],
    );
    pipeline.process_batch_at(batch, now).await.unwrap();

    let history = stores.target.history(&customer_key(1)).await;
    assert_eq!(
        history[0].validity,
        Some(Validity::current(1, Cell::I64(now.timestamp_millis())))
    );
}
