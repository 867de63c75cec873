//! Target tables batches are merged into.

mod base;
pub mod file;
pub mod memory;
mod state;

pub use base::{ApplyOutcome, AtomicCommit, TargetStore};
