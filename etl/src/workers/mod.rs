//! Policies applied by the pipeline driver when a batch fails.

pub mod policy;
