use config::shared::MergeConfig;
use etl::pipeline::{BatchOutcome, PARALLEL_CLASSIFICATION_MIN_RECORDS};
use etl::test_utils::history::assert_history_invariants;
use etl::test_utils::pipeline::memory_pipeline;
use etl::test_utils::table::{customer_row, customers_batch, scd2_config, upsert_config};
use etl::types::Batch;
use telemetry::tracing::init_test_tracing;

const KEYS: i64 = 1_000;

fn first_batch() -> Batch {
    customers_batch(1, (0..600).map(|id| customer_row(id, "initial", 1)).collect())
}

/// Touches keys 300..1000: every third one changes, the rest of the existing keys are
/// unchanged and keys from 600 on are new.
fn second_batch() -> Batch {
    customers_batch(
        2,
        (300..KEYS)
            .map(|id| {
                if id % 3 == 0 {
                    customer_row(id, "changed", 2)
                } else {
                    customer_row(id, "initial", 1)
                }
            })
            .collect(),
    )
}

async fn run_both(config: MergeConfig) {
    assert!(KEYS as usize >= PARALLEL_CLASSIFICATION_MIN_RECORDS);

    let (mut sequential, sequential_stores) =
        memory_pipeline(config.clone().with_classification_workers(1)).await;
    let (mut parallel, parallel_stores) =
        memory_pipeline(config.with_classification_workers(4)).await;

    for batch in [first_batch(), second_batch()] {
        let expected = sequential.process_batch(batch.clone()).await.unwrap();
        let actual = parallel.process_batch(batch).await.unwrap();

        let (BatchOutcome::Applied(expected), BatchOutcome::Applied(actual)) = (expected, actual)
        else {
            panic!("expected both batches to apply");
        };
        assert_eq!(actual.inserted, expected.inserted);
        assert_eq!(actual.updated, expected.updated);
        assert_eq!(actual.unchanged, expected.unchanged);
    }

    assert_eq!(
        parallel_stores.target.rows().await,
        sequential_stores.target.rows().await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_classification_matches_sequential_upserts() {
    init_test_tracing();
    run_both(upsert_config()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_classification_matches_sequential_history() {
    init_test_tracing();
    run_both(scd2_config()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_classification_counts_every_record_once() {
    init_test_tracing();
    let (mut pipeline, stores) =
        memory_pipeline(scd2_config().with_classification_workers(3)).await;

    pipeline.process_batch(first_batch()).await.unwrap();
    let outcome = pipeline.process_batch(second_batch()).await.unwrap();

    let BatchOutcome::Applied(report) = outcome else {
        panic!("expected an applied batch");
    };
    // 300..600 exist: 100 of them change. 600..1000 are new.
    assert_eq!(report.updated, 100);
    assert_eq!(report.unchanged, 200);
    assert_eq!(report.inserted, 400);
    assert_history_invariants(&stores.target.rows().await);
}
