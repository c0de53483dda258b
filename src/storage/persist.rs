//! File plumbing shared by the directory and the article cache.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

use super::types::PersistError;

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads a store file, returning `None` when it does not exist.
///
/// SEC-014: Files larger than `max_size` are rejected before reading to
/// prevent memory exhaustion from a corrupted or hostile file.
pub(crate) async fn read_store_file(
    path: &Path,
    max_size: u64,
) -> Result<Option<String>, PersistError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > max_size => {
            return Err(PersistError::TooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                max: max_size,
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    }

    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        // Race: file removed between metadata and read
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(PersistError::Parse {
            path: path.to_path_buf(),
            message: "file is not valid UTF-8".to_string(),
        }),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Removes a store file; a file that is already gone is fine.
pub(crate) async fn remove_store_file(path: &Path) -> Result<(), PersistError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Atomically replaces `path` with `contents`.
///
/// Writes a temporary file next to the destination, syncs it, then renames it
/// over the destination so a crash never leaves a half-written store. Parent
/// directories are created as needed.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let temp_path = temp_path_for(path);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fails if the file exists (prevents symlink race)
        .open(&temp_path)
        .await
        .map_err(|e| io_error(&temp_path, e))?;

    let written = async {
        file.write_all(contents).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_error(&temp_path, e));
    }
    drop(file);

    #[cfg(windows)]
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(path, e));
        }
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_error(path, e));
    }

    tracing::debug!(path = %path.display(), bytes = contents.len(), "Store written");
    Ok(())
}

/// SEC-009: Randomized temp filename so the path cannot be predicted.
fn temp_path_for(path: &Path) -> PathBuf {
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{:016x}", random_suffix));
    path.with_file_name(name)
}
