use config::shared::{MergeConfig, MergeMode, OrderBy, RetryConfig};

use crate::types::{Batch, BusinessKey, Cell, ColumnSchema, ColumnType, TableRow, TableSchema};

pub const CUSTOMERS_TABLE: &str = "customers";

/// Columns of the `customers` fixture: `id int64 not null`, `name text`, `updated_at int64`.
pub fn customers_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("id", ColumnType::Int64, false),
        ColumnSchema::new("name", ColumnType::Text, true),
        ColumnSchema::new("updated_at", ColumnType::Int64, true),
    ]
}

pub fn customers_schema() -> TableSchema {
    TableSchema::new(CUSTOMERS_TABLE, customers_columns())
}

pub fn customer_row(id: i64, name: &str, updated_at: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(name.to_string()),
        Cell::I64(updated_at),
    ])
}

/// Builds a batch over [`customers_columns`].
pub fn customers_batch(offset: u64, rows: Vec<TableRow>) -> Batch {
    Batch::new(offset, customers_columns(), rows)
}

/// Builds a `customers` batch from `(id, name, updated_at)` tuples.
pub fn customers_batch_of(offset: u64, rows: &[(i64, &str, i64)]) -> Batch {
    customers_batch(
        offset,
        rows.iter()
            .map(|(id, name, updated_at)| customer_row(*id, name, *updated_at))
            .collect(),
    )
}

pub fn customer_key(id: i64) -> BusinessKey {
    BusinessKey::new(vec![Cell::I64(id)])
}

/// Retry settings with millisecond delays so conflict tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

/// Upsert configuration keyed by `id` and ordered by `updated_at`.
pub fn upsert_config() -> MergeConfig {
    MergeConfig::new(vec!["id".to_string()], OrderBy::descending("updated_at"))
        .with_retry(fast_retry(3))
}

/// SCD2 configuration keyed by `id` and ordered by `updated_at`.
pub fn scd2_config() -> MergeConfig {
    upsert_config().with_mode(MergeMode::Scd2)
}
