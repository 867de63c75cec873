use std::collections::HashSet;
use std::time::Duration;

use etl::error::{ErrorKind, EtlResult};
use etl::pipeline::MergePipeline;
use etl::source::memory::MemoryBatchSource;
use etl::store::checkpoint::memory::MemoryCheckpointStore;
use etl::store::target::memory::MemoryTargetStore;
use etl::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use etl::test_utils::table::{customers_batch_of, customers_schema, fast_retry, upsert_config};
use etl::types::{BusinessKey, ColumnSchema, Offset, TableSchema, TargetSnapshot};
use telemetry::tracing::init_test_tracing;

/// Target whose snapshot reads take `delay`.
#[derive(Debug, Clone)]
struct SlowTargetStore {
    inner: MemoryTargetStore,
    delay: Duration,
}

impl TargetStore for SlowTargetStore {
    async fn schema(&self) -> EtlResult<TableSchema> {
        self.inner.schema().await
    }

    async fn add_column(&self, column: ColumnSchema) -> EtlResult<()> {
        self.inner.add_column(column).await
    }

    async fn read_snapshot(&self, keys: &HashSet<BusinessKey>) -> EtlResult<TargetSnapshot> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_snapshot(keys).await
    }

    async fn current_keys(&self) -> EtlResult<HashSet<BusinessKey>> {
        self.inner.current_keys().await
    }

    async fn apply_atomic(&self, commit: AtomicCommit) -> EtlResult<ApplyOutcome> {
        self.inner.apply_atomic(commit).await
    }

    async fn last_applied_offset(&self) -> EtlResult<Option<Offset>> {
        self.inner.last_applied_offset().await
    }
}

async fn slow_pipeline(
    delay: Duration,
    budget: Duration,
    attempts: u32,
) -> (
    MergePipeline<SlowTargetStore, MemoryCheckpointStore>,
    MemoryTargetStore,
) {
    let inner = MemoryTargetStore::new(customers_schema());
    let target = SlowTargetStore {
        inner: inner.clone(),
        delay,
    };
    let config = upsert_config()
        .with_batch_time_budget(budget)
        .with_retry(fast_retry(attempts));
    let pipeline = MergePipeline::new(config, target, MemoryCheckpointStore::new())
        .await
        .unwrap();

    (pipeline, inner)
}

#[tokio::test(start_paused = true)]
async fn batch_over_its_budget_times_out_without_side_effects() {
    init_test_tracing();
    let (mut pipeline, target) =
        slow_pipeline(Duration::from_secs(60), Duration::from_secs(1), 1).await;

    let err = pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BatchTimeout);
    assert!(target.rows().await.is_empty());
    assert!(pipeline.checkpoints().committed().is_none());
    assert!(pipeline.checkpoints().pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn batch_within_its_budget_applies() {
    init_test_tracing();
    let (mut pipeline, target) =
        slow_pipeline(Duration::from_millis(10), Duration::from_secs(1), 1).await;

    pipeline
        .process_batch(customers_batch_of(1, &[(1, "A", 1)]))
        .await
        .unwrap();

    assert_eq!(target.rows().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_retries_timed_out_batches_then_gives_up() {
    init_test_tracing();
    let (mut pipeline, target) =
        slow_pipeline(Duration::from_secs(60), Duration::from_secs(1), 3).await;

    let mut source = MemoryBatchSource::new(vec![customers_batch_of(1, &[(1, "A", 1)])]);
    let err = pipeline.run(&mut source).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BatchTimeout);
    assert!(target.rows().await.is_empty());
}
