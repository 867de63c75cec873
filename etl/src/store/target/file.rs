use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::EtlResult;
use crate::store::fs::{read_if_exists, write_atomically};
use crate::store::target::state::{TableFile, TableState};
use crate::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use crate::types::{BusinessKey, ColumnSchema, Offset, TableSchema, TargetSnapshot};

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    state: TableState,
}

/// Target table persisted as a single JSON file.
///
/// The file has no multi-row transactions, so every change stages the complete new table in
/// a temporary file and renames it over the live one. The applied offset is stored in the
/// same file, which makes it part of the same swap as the rows.
#[derive(Debug, Clone)]
pub struct JsonFileTargetStore {
    inner: Arc<Mutex<Inner>>,
}

impl JsonFileTargetStore {
    /// Opens the table at `path`, creating it with `schema` when the file does not exist.
    ///
    /// An existing file keeps its own schema and `schema` is ignored.
    pub async fn open(path: impl Into<PathBuf>, schema: TableSchema) -> EtlResult<Self> {
        let path = path.into();

        let state = match read_if_exists(&path).await? {
            Some(contents) => {
                let file: TableFile = serde_json::from_slice(&contents)?;
                let state = TableState::from(file);
                info!(
                    path = %path.display(),
                    generation = state.generation,
                    applied_offset = ?state.applied_offset,
                    "opened target table"
                );
                state
            }
            None => {
                let state = TableState::new(schema);
                persist(&path, &state).await?;
                info!(path = %path.display(), table = %state.schema.name, "created target table");
                state
            }
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { path, state })),
        })
    }
}

async fn persist(path: &Path, state: &TableState) -> EtlResult<()> {
    let contents = serde_json::to_vec_pretty(&TableFile::from(state))?;
    write_atomically(path, &contents).await
}

impl TargetStore for JsonFileTargetStore {
    async fn schema(&self) -> EtlResult<TableSchema> {
        Ok(self.inner.lock().await.state.schema.clone())
    }

    async fn add_column(&self, column: ColumnSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        let mut next = inner.state.clone();
        if next.add_column(column)? {
            persist(&inner.path, &next).await?;
            inner.state = next;
        }

        Ok(())
    }

    async fn read_snapshot(&self, keys: &HashSet<BusinessKey>) -> EtlResult<TargetSnapshot> {
        Ok(self.inner.lock().await.state.snapshot(keys))
    }

    async fn current_keys(&self) -> EtlResult<HashSet<BusinessKey>> {
        Ok(self.inner.lock().await.state.current_keys())
    }

    async fn apply_atomic(&self, commit: AtomicCommit) -> EtlResult<ApplyOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.state.generation != commit.expected_generation {
            return Ok(ApplyOutcome::Conflict {
                current_generation: inner.state.generation,
            });
        }

        let staged = inner.state.stage(commit.mutations)?;
        let mut next = inner.state.clone();
        next.install(staged, commit.offset);

        // The live file and the in-memory state only change once the rename succeeded.
        persist(&inner.path, &next).await?;
        inner.state = next;

        debug!(
            offset = %commit.offset,
            generation = inner.state.generation,
            "applied mutations to file target"
        );

        Ok(ApplyOutcome::Committed {
            generation: inner.state.generation,
        })
    }

    async fn last_applied_offset(&self) -> EtlResult<Option<Offset>> {
        Ok(self.inner.lock().await.state.applied_offset)
    }
}
