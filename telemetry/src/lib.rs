//! Tracing setup shared by the merge service and the test suites.

pub mod tracing;
