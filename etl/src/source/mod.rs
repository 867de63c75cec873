//! Batch sources.

mod base;
pub mod directory;
pub mod memory;

pub use base::BatchSource;
