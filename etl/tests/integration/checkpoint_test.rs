use std::ops::RangeInclusive;

use etl::checkpoint::{CheckpointManager, RecoveryAction, batch_content_hash};
use etl::merge::RowMutation;
use etl::pipeline::BatchOutcome;
use etl::source::memory::MemoryBatchSource;
use etl::store::target::memory::MemoryTargetStore;
use etl::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use etl::test_utils::pipeline::{MemoryStores, memory_pipeline};
use etl::test_utils::table::{
    customer_key, customers_batch_of, customers_schema, scd2_config, upsert_config,
};
use etl::types::{Batch, Cell, Offset, TargetRow};
use telemetry::tracing::init_test_tracing;

/// Batch `n` updates key 1 and inserts key `n + 1`.
fn batches(offsets: RangeInclusive<u64>) -> Vec<Batch> {
    offsets
        .map(|offset| {
            let name = format!("v{offset}");
            let t = offset as i64;
            customers_batch_of(offset, &[(1, name.as_str(), t), (t + 1, "new", 1)])
        })
        .collect()
}

#[tokio::test]
async fn restart_resumes_after_the_committed_offset() {
    init_test_tracing();
    let stores = MemoryStores::customers();

    let mut pipeline = stores.start(scd2_config()).await;
    let first = pipeline
        .run(&mut MemoryBatchSource::new(batches(1..=3)))
        .await
        .unwrap();
    assert_eq!(first.batches_applied, 3);
    assert_eq!(first.last_committed, Some(Offset::new(3)));
    drop(pipeline);

    let first_run_history = stores.target.history(&customer_key(1)).await;

    let mut restarted = stores.start(scd2_config()).await;
    let second = restarted
        .run(&mut MemoryBatchSource::new(batches(1..=5)))
        .await
        .unwrap();

    assert_eq!(second.batches_skipped, 3);
    assert_eq!(second.batches_applied, 2);
    assert_eq!(second.last_committed, Some(Offset::new(5)));

    // Key 1 gained exactly one version per new batch and its closed versions are untouched.
    let history = stores.target.history(&customer_key(1)).await;
    assert_eq!(history.len(), 5);
    assert_eq!(history[..2], first_run_history[..2]);
    assert_eq!(stores.target.rows().await.len(), 5 + 5);
}

#[tokio::test]
async fn replaying_a_committed_batch_is_skipped_and_leaves_the_target_unchanged() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;
    let batch = customers_batch_of(1, &[(1, "A", 1), (2, "B", 1)]);

    pipeline.process_batch(batch.clone()).await.unwrap();
    let rows = stores.target.rows().await;
    let generation = stores.target.generation().await;

    let outcome = pipeline.process_batch(batch).await.unwrap();

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
async fn replay_with_different_content_is_still_skipped() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    let outcome = pipeline
        .process_batch(customers_batch_of(1, &[(1, "changed", 2)]))
        .await
        .unwrap();

    assert!(matches!(outcome, BatchOutcome::Skipped { .. }));
    assert_eq!(
        stores.target.rows().await[0].values,
        vec![Cell::I64(1), Cell::from("A"), Cell::I64(1)]
    );
}

#[tokio::test]
async fn committed_checkpoint_records_the_batch_hash() {
    init_test_tracing();
    let (mut pipeline, stores) = memory_pipeline(upsert_config()).await;
    let batch = customers_batch_of(7, &[(1, "A", 1)]);
    let hash = batch_content_hash(&batch);

    pipeline.process_batch(batch).await.unwrap();

    let record = stores.checkpoints.record().await.unwrap();
    let committed = record.committed.unwrap();
    assert_eq!(committed.offset, Offset::new(7));
    assert_eq!(committed.batch_hash, Some(hash));
    assert!(record.pending.is_none());
}

#[tokio::test]
async fn startup_commits_a_pending_batch_that_reached_the_target() {
    init_test_tracing();
    let stores = MemoryStores::customers();

    // Simulate a crash between the atomic apply and the checkpoint confirm.
    let mut manager = CheckpointManager::load(stores.checkpoints.clone())
        .await
        .unwrap();
    manager
        .stage(Offset::new(1), "hash".to_string())
        .await
        .unwrap();
    let outcome = stores
        .target
        .apply_atomic(AtomicCommit {
            expected_generation: stores.target.generation().await,
            offset: Offset::new(1),
            mutations: vec![RowMutation::Insert(TargetRow::new(
                customer_key(1),
                vec![Cell::I64(1), Cell::from("A"), Cell::I64(1)],
            ))],
        })
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Committed { .. }));
    drop(manager);

    let mut pipeline = stores.start(upsert_config()).await;
    assert_eq!(
        pipeline.checkpoints().committed_offset(),
        Some(Offset::new(1))
    );
    assert!(pipeline.checkpoints().pending().is_none());

    let outcome = pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    assert!(matches!(outcome, BatchOutcome::Skipped { .. }));
    assert_eq!(stores.target.rows().await.len(), 1);
}

#[tokio::test]
async fn startup_drops_a_pending_batch_that_never_reached_the_target() {
    init_test_tracing();
    let stores = MemoryStores::customers();

    let mut manager = CheckpointManager::load(stores.checkpoints.clone())
        .await
        .unwrap();
    manager
        .stage(Offset::new(1), "hash".to_string())
        .await
        .unwrap();
    assert_eq!(
        manager.recover(&stores.target).await.unwrap(),
        RecoveryAction::DroppedPending(Offset::new(1))
    );
    manager
        .stage(Offset::new(1), "hash".to_string())
        .await
        .unwrap();
    drop(manager);

    let mut pipeline = stores.start(upsert_config()).await;
    assert!(pipeline.checkpoints().committed().is_none());
    assert!(pipeline.checkpoints().pending().is_none());

    let outcome = pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();
    assert!(matches!(outcome, BatchOutcome::Applied(_)));
}

#[tokio::test]
async fn reset_to_reprocesses_batches_after_the_target_is_restored() {
    init_test_tracing();
    let stores = MemoryStores::customers();
    let mut pipeline = stores.start(upsert_config()).await;

    pipeline
        .run(&mut MemoryBatchSource::new(batches(1..=2)))
        .await
        .unwrap();
    pipeline.checkpoints_mut().reset_to(None).await.unwrap();
    drop(pipeline);

    // A fresh target stands in for a restored backup.
    let restored = MemoryStores {
        target: MemoryTargetStore::new(customers_schema()),
        checkpoints: stores.checkpoints.clone(),
    };
    let mut pipeline = restored.start(upsert_config()).await;
    let summary = pipeline
        .run(&mut MemoryBatchSource::new(batches(1..=2)))
        .await
        .unwrap();

    assert_eq!(summary.batches_applied, 2);
    assert_eq!(restored.target.rows().await, stores.target.rows().await);
}

#[tokio::test]
async fn reset_without_restoring_the_target_adopts_its_offset_again() {
    init_test_tracing();
    let stores = MemoryStores::customers();
    let mut pipeline = stores.start(upsert_config()).await;

    pipeline
        .run(&mut MemoryBatchSource::new(batches(1..=2)))
        .await
        .unwrap();
    pipeline.checkpoints_mut().reset_to(None).await.unwrap();
    drop(pipeline);

    let pipeline = stores.start(upsert_config()).await;
    assert_eq!(
        pipeline.checkpoints().committed_offset(),
        Some(Offset::new(2))
    );
}
