use std::path::PathBuf;

use crate::checkpoint::CheckpointRecord;
use crate::error::EtlResult;
use crate::store::checkpoint::CheckpointStore;
use crate::store::fs::{read_if_exists, write_atomically};

/// Checkpoint record stored as a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> EtlResult<Option<CheckpointRecord>> {
        match read_if_exists(&self.path).await? {
            Some(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &CheckpointRecord) -> EtlResult<()> {
        let contents = serde_json::to_vec_pretty(record)?;
        write_atomically(&self.path, &contents).await
    }
}
