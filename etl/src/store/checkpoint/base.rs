use std::future::Future;

use crate::checkpoint::CheckpointRecord;
use crate::error::EtlResult;

/// Trait for durably storing the checkpoint record of one pipeline.
///
/// A successful [`CheckpointStore::save`] must survive a process crash.
pub trait CheckpointStore {
    /// Loads the stored record, [`None`] when nothing was ever saved.
    fn load(&self) -> impl Future<Output = EtlResult<Option<CheckpointRecord>>> + Send;

    /// Replaces the stored record.
    fn save(&self, record: &CheckpointRecord) -> impl Future<Output = EtlResult<()>> + Send;
}
