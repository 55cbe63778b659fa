//! Scheduled self-update: check, download, drain, hand off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::installer::InstallerLauncher;
use super::package::{PackageLayout, prepare_package};
use crate::Result;
use crate::agent::NodeState;
use crate::client::{ControlPlane, Version};
use crate::scheduler::{ScheduledTask, TaskContext};
use crate::worker::ActiveRunners;

/// Settings of the update coordinator.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub layout: PackageLayout,
    pub local_version: Version,
    /// Sleep between checks for running jobs while draining.
    pub drain_poll: Duration,
}

/// Replaces this node with a newer release once no job is running.
pub struct UpdateCoordinator {
    client: Arc<dyn ControlPlane>,
    state: Arc<NodeState>,
    runners: Arc<dyn ActiveRunners>,
    installer: Arc<dyn InstallerLauncher>,
    config: UpdateConfig,
}

impl UpdateCoordinator {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        state: Arc<NodeState>,
        runners: Arc<dyn ActiveRunners>,
        installer: Arc<dyn InstallerLauncher>,
        config: UpdateConfig,
    ) -> Self {
        Self {
            client,
            state,
            runners,
            installer,
            config,
        }
    }

    /// Newer control-plane version, if auto update is on and one exists.
    async fn available_update(&self) -> Option<Version> {
        let settings = match self.client.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to get node settings");
                return None;
            }
        };
        if !settings.auto_update_enabled {
            debug!("Auto update disabled");
            return None;
        }

        let server_version = match self.client.get_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Failed to get control plane version");
                return None;
            }
        };
        if server_version <= self.config.local_version {
            debug!(%server_version, "Node is up to date");
            return None;
        }
        Some(server_version)
    }

    /// Wait until no job is running. Returns `false` if shutdown interrupted the wait.
    async fn drain(&self) -> bool {
        let shutdown = self.state.shutdown_token();
        while self.runners.has_active_runners() {
            info!("Waiting for running jobs to finish before updating");
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.config.drain_poll) => {}
            }
        }
        true
    }
}

#[async_trait]
impl ScheduledTask for UpdateCoordinator {
    fn name(&self) -> &str {
        "update-coordinator"
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
        if self.state.is_update_pending() {
            return Ok(());
        }

        let Some(version) = self.available_update().await else {
            return Ok(());
        };
        info!(
            %version,
            local_version = %self.config.local_version,
            "Node update available"
        );

        let package = match prepare_package(&*self.client, &self.config.layout, version).await {
            Ok(package) => package,
            Err(e) => {
                error!(%version, error = %e, "Failed to prepare update; will retry");
                return Ok(());
            }
        };

        self.state.set_update_pending();
        if !self.drain().await {
            info!("Shutdown requested while draining; update abandoned");
            return Ok(());
        }

        let pid = std::process::id();
        if let Err(e) = self.installer.launch(&package.script, pid) {
            error!(error = %e, "Failed to launch installer");
            self.state.clear_update_pending();
            return Ok(());
        }

        info!(%version, "Installer started; shutting down");
        self.state.request_shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NodeSettings;
    use crate::scheduler::SchedulerHandle;
    use crate::testing::{FakeControlPlane, test_node};
    use crate::update::package::tests::update_archive;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Reports running jobs for the first `busy_polls` checks.
    struct CountdownRunners {
        busy_polls: usize,
        polls: AtomicUsize,
    }

    impl ActiveRunners for CountdownRunners {
        fn has_active_runners(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) < self.busy_polls
        }
    }

    #[derive(Default)]
    struct RecordingInstaller {
        launches: Mutex<Vec<(PathBuf, u32)>>,
        polls_at_launch: AtomicUsize,
        runners: Mutex<Option<Arc<CountdownRunners>>>,
        fail: bool,
    }

    impl InstallerLauncher for RecordingInstaller {
        fn launch(&self, script: &Path, pid: u32) -> Result<()> {
            if let Some(runners) = self.runners.lock().as_ref() {
                self.polls_at_launch
                    .store(runners.polls.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            if self.fail {
                return Err(crate::Error::update("installer missing"));
            }
            self.launches.lock().push((script.to_path_buf(), pid));
            Ok(())
        }
    }

    struct Harness {
        client: Arc<FakeControlPlane>,
        state: Arc<NodeState>,
        runners: Arc<CountdownRunners>,
        installer: Arc<RecordingInstaller>,
        coordinator: UpdateCoordinator,
        _temp: TempDir,
    }

    fn harness(busy_polls: usize, installer_fails: bool) -> Harness {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(FakeControlPlane::new(test_node(1, "/tmp")));
        *client.settings.lock() = NodeSettings {
            auto_update_enabled: true,
            ..Default::default()
        };
        *client.version.lock() = Version::new(9, 9, 9, 9);
        *client.update_binary.lock() = Some(update_archive());

        let state = Arc::new(NodeState::new());
        let runners = Arc::new(CountdownRunners {
            busy_polls,
            polls: AtomicUsize::new(0),
        });
        let installer = Arc::new(RecordingInstaller {
            fail: installer_fails,
            ..Default::default()
        });
        *installer.runners.lock() = Some(runners.clone());

        let coordinator = UpdateCoordinator::new(
            client.clone(),
            state.clone(),
            runners.clone(),
            installer.clone(),
            UpdateConfig {
                layout: PackageLayout::in_data_dir(temp.path()),
                local_version: Version::new(1, 0, 0, 0),
                drain_poll: Duration::from_secs(10),
            },
        );
        Harness {
            client,
            state,
            runners,
            installer,
            coordinator,
            _temp: temp,
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(SchedulerHandle::new("update-coordinator"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_installer_launched_after_drain() {
        let h = harness(3, false);

        h.coordinator.execute(&ctx()).await.unwrap();

        // Three busy polls, then the first idle poll releases the installer.
        assert_eq!(h.runners.polls.load(Ordering::SeqCst), 4);
        assert_eq!(h.installer.polls_at_launch.load(Ordering::SeqCst), 4);
        let launches = h.installer.launches.lock();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].1, std::process::id());
        assert!(h.state.is_update_pending());
        assert!(h.state.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_in_poll_increments() {
        let h = harness(3, false);
        let started = tokio::time::Instant::now();

        h.coordinator.execute(&ctx()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_auto_update_disabled_does_nothing() {
        let h = harness(0, false);
        h.client.settings.lock().auto_update_enabled = false;

        h.coordinator.execute(&ctx()).await.unwrap();

        assert!(h.installer.launches.lock().is_empty());
        assert!(!h.state.is_update_pending());
    }

    #[tokio::test]
    async fn test_same_version_does_nothing() {
        let h = harness(0, false);
        *h.client.version.lock() = Version::new(1, 0, 0, 0);

        h.coordinator.execute(&ctx()).await.unwrap();

        assert!(h.installer.launches.lock().is_empty());
        assert!(!h.state.is_update_pending());
    }

    #[tokio::test]
    async fn test_bad_package_retries_next_cycle() {
        let h = harness(0, false);
        *h.client.update_binary.lock() = Some(bytes::Bytes::from_static(b"garbage"));

        h.coordinator.execute(&ctx()).await.unwrap();
        assert!(!h.state.is_update_pending());
        assert!(h.installer.launches.lock().is_empty());

        *h.client.update_binary.lock() = Some(update_archive());
        h.coordinator.execute(&ctx()).await.unwrap();
        assert_eq!(h.installer.launches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_installer_failure_withdraws_update() {
        let h = harness(0, true);

        h.coordinator.execute(&ctx()).await.unwrap();

        assert!(!h.state.is_update_pending());
        assert!(!h.state.is_shutting_down());
    }

    #[tokio::test]
    async fn test_pending_update_skips_check() {
        let h = harness(0, false);
        h.state.set_update_pending();

        h.coordinator.execute(&ctx()).await.unwrap();
        assert!(h.installer.launches.lock().is_empty());
    }
}
