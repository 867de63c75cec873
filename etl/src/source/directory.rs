use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::source::BatchSource;
use crate::types::{Batch, Cell, ColumnSchema, Offset, TableRow};

/// Layout of one batch file.
///
/// ```json
/// {
///   "offset": 3,
///   "schema": [{"name": "id", "type": "int64", "nullable": false}],
///   "rows": [[1], [2]]
/// }
/// ```
#[derive(Debug, Deserialize)]
struct BatchFile {
    offset: Offset,
    schema: Vec<ColumnSchema>,
    rows: Vec<Vec<serde_json::Value>>,
}

/// Leading field of a batch file, used to order the files.
#[derive(Debug, Deserialize)]
struct BatchHeader {
    offset: Offset,
}

/// Source reading one batch per `*.json` file of a directory, in offset order.
///
/// The directory is listed once when the source is opened. File names carry no meaning.
#[derive(Debug)]
pub struct DirectoryBatchSource {
    files: VecDeque<PathBuf>,
}

impl DirectoryBatchSource {
    pub async fn open(directory: impl AsRef<Path>) -> EtlResult<Self> {
        let directory = directory.as_ref();
        let mut entries = tokio::fs::read_dir(directory).await?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            if is_json && entry.file_type().await?.is_file() {
                let contents = tokio::fs::read(&path).await?;
                let header: BatchHeader = serde_json::from_slice(&contents)?;
                files.push((header.offset, path));
            }
        }
        files.sort();

        for pair in files.windows(2) {
            if pair[0].0 == pair[1].0 {
                bail!(
                    ErrorKind::InvalidData,
                    "Two batch files carry the same offset",
                    format!(
                        "{} and {} both have offset {}",
                        pair[0].1.display(),
                        pair[1].1.display(),
                        pair[0].0
                    )
                );
            }
        }

        debug!(directory = %directory.display(), files = files.len(), "listed batch files");

        Ok(Self {
            files: files.into_iter().map(|(_, path)| path).collect(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl BatchSource for DirectoryBatchSource {
    async fn next_batch(&mut self) -> EtlResult<Option<Batch>> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };

        let contents = tokio::fs::read(&path).await?;
        let file: BatchFile = serde_json::from_slice(&contents)?;

        parse_batch(file, &path).map(Some)
    }
}

fn parse_batch(file: BatchFile, path: &Path) -> EtlResult<Batch> {
    let mut rows = Vec::with_capacity(file.rows.len());

    for (row_idx, values) in file.rows.into_iter().enumerate() {
        if values.len() != file.schema.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row width does not match the batch schema",
                format!(
                    "{} row {row_idx} has {} values, the schema has {} columns",
                    path.display(),
                    values.len(),
                    file.schema.len()
                )
            );
        }

        let cells = values
            .iter()
            .zip(&file.schema)
            .map(|(value, column)| Cell::from_json(value, column.typ))
            .collect::<EtlResult<Vec<_>>>()?;
        rows.push(TableRow::new(cells));
    }

    Ok(Batch::new(file.offset, file.schema, rows))
}
