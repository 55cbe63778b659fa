//! Removal of abandoned job directories from the node temp path.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::agent::NodeState;
use crate::scheduler::{ScheduledTask, TaskContext};
use crate::utils::fs;
use crate::worker::ActiveJobSet;

/// Prefix of per-job directories created by the flow runner.
pub const JOB_DIR_PREFIX: &str = "Runner-";

/// Hour of day the cleaner runs.
pub const TEMP_CLEANER_HOUR: u32 = 4;

/// Whether a job directory created at `created` is past `max_age`.
/// A directory of unknown age is never expired.
pub fn is_expired(
    created: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_age: TimeDelta,
) -> bool {
    created.is_some_and(|created| now - created > max_age)
}

/// Job uid encoded in a `Runner-<uid>` directory name.
fn job_uid(dir_name: &str) -> Option<Uuid> {
    dir_name
        .strip_prefix(JOB_DIR_PREFIX)
        .and_then(|uid| Uuid::parse_str(uid).ok())
}

/// Deletes `Runner-*` directories older than a day from the cached temp path.
pub struct TempDirCleaner {
    state: Arc<NodeState>,
    slots: Arc<ActiveJobSet>,
    max_age: TimeDelta,
}

impl TempDirCleaner {
    /// Directories of jobs still holding a slot in `slots` are never deleted.
    pub fn new(state: Arc<NodeState>, slots: Arc<ActiveJobSet>) -> Self {
        Self {
            state,
            slots,
            max_age: TimeDelta::hours(24),
        }
    }

    /// Sweep `temp_path` as if the time were `now`. Returns the number of deleted directories.
    pub async fn sweep_at(&self, temp_path: &Path, now: DateTime<Utc>) -> usize {
        let mut entries = match tokio::fs::read_dir(temp_path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %temp_path.display(), error = %e, "Failed to read temp path");
                return 0;
            }
        };

        let mut deleted = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        path = %temp_path.display(),
                        error = %e,
                        "Failed to read temp path entry"
                    );
                    break;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().filter(|n| n.starts_with(JOB_DIR_PREFIX)) else {
                continue;
            };

            let path = entry.path();
            if job_uid(name).is_some_and(|uid| self.slots.contains(&uid)) {
                debug!(path = %path.display(), "Job still running; keeping its directory");
                continue;
            }
            let created = match entry.metadata().await {
                Ok(metadata) if metadata.is_dir() => fs::created_at(&metadata),
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat job directory");
                    continue;
                }
            };
            if !is_expired(created, now, self.max_age) {
                continue;
            }

            if fs::remove_dir_best_effort(&path).await {
                info!(path = %path.display(), "Deleted abandoned job directory");
                deleted += 1;
            }
        }
        deleted
    }
}

#[async_trait]
impl ScheduledTask for TempDirCleaner {
    fn name(&self) -> &str {
        "temp-dir-cleaner"
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
        let Some(temp_path) = self.state.temp_path() else {
            debug!("Temp path not known yet; skipping sweep");
            return Ok(());
        };
        let deleted = self.sweep_at(&temp_path, Utc::now()).await;
        debug!(deleted, "Temp directory sweep finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerHandle;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("Runner-1111").join("work")).unwrap();
        std::fs::create_dir_all(root.join("Runner-2222")).unwrap();
        std::fs::create_dir_all(root.join("cache")).unwrap();
        std::fs::write(root.join("Runner-notes.txt"), "keep").unwrap();
    }

    #[tokio::test]
    async fn test_old_job_dirs_deleted() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path());

        let cleaner = TempDirCleaner::new(Arc::new(NodeState::new()), ActiveJobSet::new());
        let deleted = cleaner
            .sweep_at(temp_dir.path(), Utc::now() + TimeDelta::hours(25))
            .await;

        assert_eq!(deleted, 2);
        assert!(!temp_dir.path().join("Runner-1111").exists());
        assert!(temp_dir.path().join("cache").exists());
        assert!(temp_dir.path().join("Runner-notes.txt").exists());
    }

    #[tokio::test]
    async fn test_fresh_job_dirs_kept() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path());

        let cleaner = TempDirCleaner::new(Arc::new(NodeState::new()), ActiveJobSet::new());
        assert_eq!(cleaner.sweep_at(temp_dir.path(), Utc::now()).await, 0);
        assert!(temp_dir.path().join("Runner-1111").exists());
    }

    #[tokio::test]
    async fn test_running_job_dir_kept() {
        let temp_dir = TempDir::new().unwrap();
        let running = Uuid::new_v4();
        let finished = Uuid::new_v4();
        std::fs::create_dir_all(temp_dir.path().join(format!("Runner-{running}"))).unwrap();
        std::fs::create_dir_all(temp_dir.path().join(format!("Runner-{finished}"))).unwrap();

        let slots = ActiveJobSet::new();
        let _guard = slots.try_claim(running, 1).unwrap();
        let cleaner = TempDirCleaner::new(Arc::new(NodeState::new()), slots);
        let deleted = cleaner
            .sweep_at(temp_dir.path(), Utc::now() + TimeDelta::hours(48))
            .await;

        assert_eq!(deleted, 1);
        assert!(temp_dir.path().join(format!("Runner-{running}")).exists());
        assert!(!temp_dir.path().join(format!("Runner-{finished}")).exists());
    }

    #[test]
    fn test_unknown_age_never_expires() {
        let now = Utc::now();
        let max_age = TimeDelta::hours(24);
        assert!(!is_expired(None, now, max_age));
        assert!(!is_expired(Some(now - TimeDelta::hours(24)), now, max_age));
        assert!(is_expired(Some(now - TimeDelta::hours(25)), now, max_age));
    }

    #[tokio::test]
    async fn test_unknown_temp_path_skips() {
        let cleaner = TempDirCleaner::new(Arc::new(NodeState::new()), ActiveJobSet::new());
        let ctx = TaskContext::new(SchedulerHandle::new("temp-dir-cleaner"));
        assert!(cleaner.execute(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_uses_cached_temp_path() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("Runner-3333")).unwrap();
        let state = Arc::new(NodeState::new());
        state.set_temp_path(temp_dir.path());

        let cleaner = TempDirCleaner::new(state, ActiveJobSet::new());
        let ctx = TaskContext::new(SchedulerHandle::new("temp-dir-cleaner"));
        cleaner.execute(&ctx).await.unwrap();

        // Freshly created, so it survives a real-time sweep.
        assert!(temp_dir.path().join("Runner-3333").exists());
    }
}
