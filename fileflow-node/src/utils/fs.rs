//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! the best-effort removal semantics the sweepers and the worker rely on.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove a directory tree if it exists.
///
/// A missing directory is not an error.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing directory", path, e)),
    }
}

/// Remove a file if it exists.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Remove a directory tree, logging instead of failing.
///
/// Returns `true` when the directory is gone afterwards.
pub async fn remove_dir_best_effort(path: &Path) -> bool {
    match remove_dir_all_if_exists(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed directory");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove directory");
            false
        }
    }
}

/// Creation time of a filesystem entry, falling back to its modification time
/// where the platform does not record creation.
pub fn created_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Modification time of a filesystem entry.
pub fn modified_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}
