//! Durable storage for checkpoint records.

mod base;
pub mod file;
pub mod memory;

pub use base::CheckpointStore;
