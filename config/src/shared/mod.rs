//! Shared configuration types for merge pipelines.

mod base;
mod merge;
mod retry;

pub use base::ValidationError;
pub use merge::{MergeConfig, MergeMode, OrderBy, SchemaErrorPolicy, SortDirection};
pub use retry::RetryConfig;
