//! Helpers shared by unit and integration tests.
//!
//! - [`table`] builds the `customers` fixture table, its rows and batches.
//! - [`pipeline`] starts pipelines over in-memory stores that tests can inspect.
//! - [`target`] wraps target stores to inject storage conflicts.
//! - [`history`] checks the structural guarantees of stored SCD2 histories.
//! - [`failpoints`] configures failpoints for the duration of a test.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod history;
pub mod pipeline;
pub mod table;
pub mod target;
