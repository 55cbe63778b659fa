//! Retention of the node's own rolled log files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::Result;
use crate::client::ControlPlane;
use crate::logging::is_log_file;
use crate::scheduler::{ScheduledTask, TaskContext};
use crate::utils::fs;

/// Files to delete so that only the `keep` most recently modified remain.
///
/// `keep == 0` disables deletion.
pub fn files_to_delete(mut files: Vec<(PathBuf, DateTime<Utc>)>, keep: usize) -> Vec<PathBuf> {
    if keep == 0 || files.len() <= keep {
        return Vec::new();
    }
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    files.into_iter().skip(keep).map(|(path, _)| path).collect()
}

/// Keeps the newest N log files, N coming from the control plane settings.
pub struct LogFileCleaner {
    client: Arc<dyn ControlPlane>,
    log_dir: PathBuf,
}

impl LogFileCleaner {
    pub fn new(client: Arc<dyn ControlPlane>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            log_dir: log_dir.into(),
        }
    }

    /// Delete all but the `keep` newest log files. Returns the number deleted.
    pub async fn sweep(&self, keep: usize) -> usize {
        let files = match list_log_files(&self.log_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to list log files");
                return 0;
            }
        };

        let mut deleted = 0;
        for path in files_to_delete(files, keep) {
            match fs::remove_file_if_exists(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), "Deleted old log file");
                    deleted += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete log file"),
            }
        }
        deleted
    }
}

async fn list_log_files(log_dir: &Path) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut entries = tokio::fs::read_dir(log_dir)
        .await
        .map_err(|e| fs::io_error("reading log directory", log_dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("reading log directory", log_dir, e))?
    {
        if !entry.file_name().to_str().is_some_and(is_log_file) {
            continue;
        }
        match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => {
                files.push((entry.path(), fs::modified_at(&metadata)));
            }
            Ok(_) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to stat log file"),
        }
    }
    Ok(files)
}

#[async_trait]
impl ScheduledTask for LogFileCleaner {
    fn name(&self) -> &str {
        "log-file-cleaner"
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
        let settings = self.client.get_settings().await?;
        let keep = settings.log_retention_count as usize;
        if keep == 0 {
            debug!("Log retention disabled");
            return Ok(());
        }
        let deleted = self.sweep(keep).await;
        debug!(deleted, keep, "Log file sweep finished");
        Ok(())
    }
}
