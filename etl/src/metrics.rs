//! Metric names and labels emitted by merge pipelines.

/// Label for the target table name.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the outcome of a batch.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for the kind of row mutation.
pub const MUTATION_KIND_LABEL: &str = "mutation_kind";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter of processed batches, labelled by outcome.
pub const ETL_MERGE_BATCHES_TOTAL: &str = "etl_merge_batches_total";

/// Counter of rows written to the target, labelled by mutation kind.
pub const ETL_MERGE_ROWS_TOTAL: &str = "etl_merge_rows_total";

/// Counter of atomic applies rejected because the target changed concurrently.
pub const ETL_MERGE_STORAGE_CONFLICTS_TOTAL: &str = "etl_merge_storage_conflicts_total";

/// Counter of records rejected as out of order.
pub const ETL_MERGE_OUT_OF_ORDER_TOTAL: &str = "etl_merge_out_of_order_total";

/// Counter of failed batches, labelled by error kind.
pub const ETL_MERGE_ERRORS_TOTAL: &str = "etl_merge_errors_total";

/// Histogram of batch processing time in seconds.
pub const ETL_MERGE_BATCH_DURATION_SECONDS: &str = "etl_merge_batch_duration_seconds";

/// Gauge of the last committed offset.
pub const ETL_MERGE_COMMITTED_OFFSET: &str = "etl_merge_committed_offset";
