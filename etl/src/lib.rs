//! Incremental table merge engine.
//!
//! Batches of rows arrive from a [`source::BatchSource`] with increasing offsets and are
//! merged into a target table owned by a [`store::target::TargetStore`], either as plain
//! upserts or as Type-2 history. Every batch runs the same chain:
//!
//! 1. [`merge::SchemaReconciler`] checks the batch schema against the target.
//! 2. [`merge::Deduplicator`] keeps one record per business key.
//! 3. [`merge::ChangeClassifier`] splits records into inserts, updates, unchanged and deletes.
//! 4. [`merge::MergePlanner`] or [`merge::Scd2Applier`] turns them into row mutations.
//! 5. The target applies all mutations and the batch offset in one atomic call, bracketed by
//!    the two-phase [`checkpoint::CheckpointManager`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use config::shared::{MergeConfig, MergeMode, OrderBy};
//! use etl::pipeline::MergePipeline;
//! use etl::source::directory::DirectoryBatchSource;
//! use etl::store::checkpoint::file::FileCheckpointStore;
//! use etl::store::target::file::JsonFileTargetStore;
//! use etl::types::{ColumnSchema, ColumnType, TableSchema};
//!
//! # async fn run() -> etl::error::EtlResult<()> {
//! let schema = TableSchema::new(
//!     "customers",
//!     vec![
//!         ColumnSchema::new("id", ColumnType::Int64, false),
//!         ColumnSchema::new("email", ColumnType::Text, true),
//!         ColumnSchema::new("updated_at", ColumnType::TimestampTz, true),
//!     ],
//! );
//! let target = JsonFileTargetStore::open("data/customers.json", schema).await?;
//! let checkpoints = FileCheckpointStore::new("data/customers.checkpoint.json");
//! let config = MergeConfig::new(vec!["id".to_string()], OrderBy::descending("updated_at"))
//!     .with_mode(MergeMode::Scd2);
//!
//! let mut pipeline = MergePipeline::new(config, target, checkpoints).await?;
//! let mut source = DirectoryBatchSource::open("batches/customers").await?;
//! let summary = pipeline.run(&mut source).await?;
//! println!("applied {} batches", summary.batches_applied);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod failpoints;
mod macros;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
