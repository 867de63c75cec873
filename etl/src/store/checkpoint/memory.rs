use std::sync::Arc;

use tokio::sync::Mutex;

use crate::checkpoint::CheckpointRecord;
use crate::error::EtlResult;
use crate::store::checkpoint::CheckpointStore;

#[derive(Debug, Default)]
struct Inner {
    record: Option<CheckpointRecord>,
}

/// In-memory checkpoint store. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last saved record.
    pub async fn record(&self) -> Option<CheckpointRecord> {
        self.inner.lock().await.record.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> EtlResult<Option<CheckpointRecord>> {
        Ok(self.inner.lock().await.record.clone())
    }

    async fn save(&self, record: &CheckpointRecord) -> EtlResult<()> {
        self.inner.lock().await.record = Some(record.clone());

        Ok(())
    }
}
