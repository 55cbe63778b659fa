//! Removal of superseded configuration revisions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::Result;
use crate::scheduler::{ScheduledTask, TaskContext};
use crate::utils::fs;

/// Name of the marker file holding the active revision number.
pub const CURRENT_MARKER: &str = "current";

/// Hour of day the cleaner runs.
pub const CONFIG_CLEANER_HOUR: u32 = 5;

/// A numbered revision directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub number: u64,
    pub created: DateTime<Utc>,
}

/// Revisions that may be deleted.
///
/// The newest and the current revision are always kept, as is anything
/// created within `grace` of `now`.
pub fn revisions_to_delete(
    revisions: &[Revision],
    current: Option<u64>,
    now: DateTime<Utc>,
    grace: TimeDelta,
) -> Vec<u64> {
    let Some(newest) = revisions.iter().map(|r| r.number).max() else {
        return Vec::new();
    };
    let mut doomed: Vec<u64> = revisions
        .iter()
        .filter(|r| r.number != newest && Some(r.number) != current)
        .filter(|r| now - r.created > grace)
        .map(|r| r.number)
        .collect();
    doomed.sort_unstable();
    doomed
}

/// Deletes old revision directories under the config root.
#[derive(Debug, Clone)]
pub struct ConfigRevisionCleaner {
    config_root: PathBuf,
    grace: TimeDelta,
}

impl ConfigRevisionCleaner {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
            grace: TimeDelta::hours(12),
        }
    }

    pub fn with_grace(mut self, grace: TimeDelta) -> Self {
        self.grace = grace;
        self
    }

    /// Sweep as if the time were `now`. Returns the number of deleted revisions.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let revisions = match list_revisions(&self.config_root).await {
            Ok(revisions) => revisions,
            Err(e) => {
                warn!(error = %e, "Failed to list config revisions");
                return 0;
            }
        };
        let current = read_current(&self.config_root).await;

        let mut deleted = 0;
        for number in revisions_to_delete(&revisions, current, now, self.grace) {
            let dir = self.config_root.join(number.to_string());
            if fs::remove_dir_best_effort(&dir).await {
                info!(revision = number, "Deleted config revision");
                deleted += 1;
            }
        }
        deleted
    }
}

async fn list_revisions(config_root: &Path) -> Result<Vec<Revision>> {
    let mut entries = match tokio::fs::read_dir(config_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(fs::io_error("reading config root", config_root, e)),
    };

    let mut revisions = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("reading config root", config_root, e))?
    {
        let Some(number) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to stat config revision");
                continue;
            }
        };
        let Some(created) = fs::created_at(&metadata) else {
            continue;
        };
        revisions.push(Revision { number, created });
    }
    Ok(revisions)
}

async fn read_current(config_root: &Path) -> Option<u64> {
    let path = config_root.join(CURRENT_MARKER);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents.trim().parse().ok(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No current config revision marker");
            None
        }
    }
}

#[async_trait]
impl ScheduledTask for ConfigRevisionCleaner {
    fn name(&self) -> &str {
        "config-revision-cleaner"
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
        let deleted = self.sweep_at(Utc::now()).await;
        debug!(deleted, "Config revision sweep finished");
        Ok(())
    }
}
