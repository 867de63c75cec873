use etl::checkpoint::RecoveryAction;
use etl::error::ErrorKind;
use etl::failpoints::MERGE_AFTER_APPLY_BEFORE_COMMIT;
use etl::pipeline::BatchOutcome;
use etl::source::memory::MemoryBatchSource;
use etl::store::target::TargetStore;
use etl::test_utils::failpoints::FailpointGuard;
use etl::test_utils::pipeline::MemoryStores;
use etl::test_utils::table::{customers_batch_of, scd2_config, upsert_config};
use etl::types::Offset;
use telemetry::tracing::init_test_tracing;

#[tokio::test]
async fn crash_between_apply_and_commit_is_healed_on_restart() {
    init_test_tracing();
    let mut failpoints = FailpointGuard::configure(&[(MERGE_AFTER_APPLY_BEFORE_COMMIT, "return")]);
    let stores = MemoryStores::customers();
    let batch = customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]);

    let mut pipeline = stores.start(upsert_config()).await;
    let err = pipeline.process_batch(batch.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WithNoRetry);

    // The rows and their offset are durable, the checkpoint is still pending.
    assert_eq!(stores.target.rows().await.len(), 2);
    assert_eq!(
        stores.target.last_applied_offset().await.unwrap(),
        Some(Offset::new(1))
    );
    let record = stores.checkpoints.record().await.unwrap();
    assert!(record.committed.is_none());
    assert_eq!(record.pending.map(|p| p.offset), Some(Offset::new(1)));
    drop(pipeline);

    failpoints.disable(MERGE_AFTER_APPLY_BEFORE_COMMIT);

    let mut restarted = stores.start(upsert_config()).await;
    assert_eq!(
        restarted.checkpoints().committed_offset(),
        Some(Offset::new(1))
    );
    let rows = stores.target.rows().await;
    let generation = stores.target.generation().await;

    let outcome = restarted.process_batch(batch).await.unwrap();
    assert_eq!(
        outcome,
        BatchOutcome::Skipped {
            offset: Offset::new(1)
        }
    );
    assert_eq!(stores.target.rows().await, rows);
    assert_eq!(stores.target.generation().await, generation);
}

#[tokio::test]
async fn pending_checkpoint_is_settled_before_the_next_batch() {
    init_test_tracing();
    let mut failpoints = FailpointGuard::configure(&[(MERGE_AFTER_APPLY_BEFORE_COMMIT, "return")]);
    let stores = MemoryStores::customers();

    let mut pipeline = stores.start(scd2_config()).await;
    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap_err();
    failpoints.disable(MERGE_AFTER_APPLY_BEFORE_COMMIT);

    // Without a restart, the next batch first resolves the pending offset.
    let outcome = pipeline
        .process_batch(customers_batch_of(2, &[(1, "B", 2)]))
        .await
        .unwrap();

    assert!(matches!(outcome, BatchOutcome::Applied(_)));
    assert_eq!(
        pipeline.checkpoints().committed_offset(),
        Some(Offset::new(2))
    );
    assert_eq!(stores.target.rows().await.len(), 2);
}

#[tokio::test]
async fn timed_retry_after_a_crash_skips_the_already_applied_batch() {
    init_test_tracing();
    let _failpoints =
        FailpointGuard::configure(&[(MERGE_AFTER_APPLY_BEFORE_COMMIT, "1*return(timed_retry)")]);
    let stores = MemoryStores::customers();

    let mut pipeline = stores.start(upsert_config()).await;
    let summary = pipeline
        .run(&mut MemoryBatchSource::new(vec![
            customers_batch_of(1, &[(1, "A", 1)]),
            customers_batch_of(2, &[(2, "B", 1)]),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.batches_skipped, 1);
    assert_eq!(summary.batches_applied, 1);
    assert_eq!(summary.last_committed, Some(Offset::new(2)));
    assert_eq!(stores.target.rows().await.len(), 2);
}

#[tokio::test]
async fn recovery_reports_the_committed_pending_offset() {
    init_test_tracing();
    let mut failpoints = FailpointGuard::configure(&[(MERGE_AFTER_APPLY_BEFORE_COMMIT, "return")]);
    let stores = MemoryStores::customers();

    let mut pipeline = stores.start(upsert_config()).await;
    pipeline
        .process_batch(customers_batch_of(3, &[(1, "A", 1)]))
        .await
        .unwrap_err();
    failpoints.disable(MERGE_AFTER_APPLY_BEFORE_COMMIT);

    let action = pipeline
        .checkpoints_mut()
        .recover(&stores.target)
        .await
        .unwrap();
    assert_eq!(action, RecoveryAction::CommittedPending(Offset::new(3)));
}
