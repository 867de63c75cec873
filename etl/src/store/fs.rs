use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::EtlResult;

/// Replaces the file at `path` with `contents` in one rename.
///
/// The contents are written and synced to a sibling temporary file first, so readers only
/// ever observe the previous or the new version of the file.
pub(crate) async fn write_atomically(path: &Path, contents: &[u8]) -> EtlResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path(path);
    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;

    Ok(())
}

/// Reads the file at `path`, returning [`None`] when it does not exist.
pub(crate) async fn read_if_exists(path: &Path) -> EtlResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
