use etl::error::ErrorKind;
use etl::pipeline::{BatchOutcome, BatchReport, MergePipeline};
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::store::target::memory::MemoryTargetStore;
use etl::test_utils::pipeline::memory_pipeline;
use etl::test_utils::table::{
    customer_key, customers_batch_of, customers_schema, fast_retry, upsert_config,
};
use etl::test_utils::target::ConflictingTargetStore;
use etl::types::{Batch, Cell, ColumnSchema, ColumnType, TableRow};
use telemetry::tracing::init_test_tracing;

fn applied(outcome: BatchOutcome) -> BatchReport {
    match outcome {
        BatchOutcome::Applied(report) => report,
        other => panic!("expected an applied batch, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_keys_keep_the_latest_record() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(1, &[(1, "A", 1), (1, "B", 2)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.records_received, 2);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(report.inserted, 1);

    let rows = stores.target.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values,
        vec![Cell::I64(1), Cell::from("B"), Cell::I64(2)]
    );
}

#[tokio::test]
async fn update_overwrites_the_row_without_history() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

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
    assert_eq!(report.inserted, 0);

    let rows = stores.target.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, customer_key(1));
    assert_eq!(
        rows[0].values,
        vec![Cell::I64(1), Cell::from("B"), Cell::I64(2)]
    );
    assert!(rows[0].validity.is_none());
}

#[tokio::test]
async fn unchanged_records_write_nothing() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]))
        .await
        .unwrap();
    let rows_before = stores.target.rows().await;

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(2, &[(1, "A", 1), (2, "B", 1)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.unchanged, 2);
    assert_eq!(report.inserted + report.updated + report.deleted, 0);
    assert_eq!(stores.target.rows().await, rows_before);
}

#[tokio::test]
async fn columns_missing_from_the_batch_keep_their_stored_value() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();

    let narrow = Batch::new(
        2,
        vec![
            ColumnSchema::new("id", ColumnType::Int64, false),
            ColumnSchema::new("updated_at", ColumnType::Int64, true),
        ],
        vec![
            TableRow::new(vec![Cell::I64(1), Cell::I64(5)]),
            TableRow::new(vec![Cell::I64(2), Cell::I64(5)]),
        ],
    );
    let report = applied(pipeline.process_batch(narrow).await.unwrap());
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 1);

    let existing = stores.target.history(&customer_key(1)).await;
    assert_eq!(
        existing[0].values,
        vec![Cell::I64(1), Cell::from("A"), Cell::I64(5)]
    );

    let inserted = stores.target.history(&customer_key(2)).await;
    assert_eq!(
        inserted[0].values,
        vec![Cell::I64(2), Cell::Null, Cell::I64(5)]
    );
}

#[tokio::test]
async fn delete_detection_removes_keys_missing_from_a_full_extract() {
    init_test_tracing();
    let config = upsert_config().with_delete_detection(true);
    let (mut pipeline, stores) = memory_pipeline(config).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1), (2, "B", 1), (3, "C", 1)]))
        .await
        .unwrap();
    let report = applied(
        pipeline
            .process_batch(customers_batch_of(2, &[(1, "A", 1), (3, "C", 2)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.deleted, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);

    assert!(stores.target.history(&customer_key(2)).await.is_empty());
    assert_eq!(stores.target.rows().await.len(), 2);
}

#[tokio::test]
async fn without_delete_detection_missing_keys_are_kept() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]))
        .await
        .unwrap();
    pipeline
        .process_batch(customers_batch_of(2, &[(1, "A", 2)]))
        .await
        .unwrap();

    assert_eq!(stores.target.rows().await.len(), 2);
}

#[tokio::test]
async fn same_content_at_a_new_offset_is_a_no_op() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;
    let rows = [(1, "A", 1), (2, "B", 2), (2, "B2", 3)];

    pipeline
        .process_batch(customers_batch_of(1, &rows))
        .await
        .unwrap();
    let after_first = stores.target.rows().await;

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(2, &rows))
            .await
            .unwrap(),
    );

    assert_eq!(report.unchanged, 2);
    assert_eq!(stores.target.rows().await, after_first);
}

#[tokio::test]
async fn storage_conflicts_are_retried_against_a_fresh_snapshot() {
    init_test_tracing();
    let target = ConflictingTargetStore::new(MemoryTargetStore::new(customers_schema()), 2);
    let checkpoints = MemoryCheckpointStore::new();
    let config = upsert_config().with_retry(fast_retry(3));
    let mut pipeline = MergePipeline::new(config, target.clone(), checkpoints.clone())
        .await
        .unwrap();

    let report = applied(
        pipeline
            .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
            .await
            .unwrap(),
    );

    assert_eq!(report.attempts, 3);
    assert_eq!(target.apply_calls(), 3);
    assert_eq!(target.inner().rows().await.len(), 1);
    assert_eq!(
        pipeline.checkpoints().committed_offset().map(|o| o.value()),
        Some(1)
    );
}

#[tokio::test]
async fn exhausted_conflict_retries_fail_the_batch_without_side_effects() {
    init_test_tracing();
    let target = ConflictingTargetStore::new(MemoryTargetStore::new(customers_schema()), 10);
    let checkpoints = MemoryCheckpointStore::new();
    let config = upsert_config().with_retry(fast_retry(3));
    let mut pipeline = MergePipeline::new(config, target.clone(), checkpoints.clone())
        .await
        .unwrap();

    let err = pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StorageConflict);
    assert_eq!(target.apply_calls(), 3);
    assert!(target.inner().rows().await.is_empty());
    assert!(pipeline.checkpoints().committed().is_none());
    assert!(pipeline.checkpoints().pending().is_none());
}
