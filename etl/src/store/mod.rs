//! Storage boundaries of the engine: the target table and the checkpoint.

pub mod checkpoint;
mod fs;
pub mod target;
