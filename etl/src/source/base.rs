use std::future::Future;

use crate::error::EtlResult;
use crate::types::Batch;

/// Trait for anything delivering batches in offset order.
///
/// Sources may redeliver batches that were already processed, the pipeline skips them using
/// its checkpoint.
pub trait BatchSource {
    /// Returns the next batch, or [`None`] at the end of the stream.
    fn next_batch(&mut self) -> impl Future<Output = EtlResult<Option<Batch>>> + Send;
}
