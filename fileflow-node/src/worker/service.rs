//! The flow worker: polls the control plane for work and runs it in
//! bounded execution slots.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::runner::{RunnerLauncher, RunnerRequest};
use super::schedule_window::ScheduleWindow;
use super::slots::{ActiveJobSet, ActiveRunners, SlotGuard};
use crate::Result;
use crate::agent::{Eligibility, NodeState};
use crate::client::{ControlPlane, NextWorkRequest, Node, ProcessingStatus, Version, WorkItem};
use crate::scheduler::{ScheduledTask, SchedulerHandle, TaskContext};
use crate::utils::fs;

/// Identity of the node the worker polls for.
#[derive(Debug, Clone)]
pub struct FlowWorkerConfig {
    /// Name this node is registered under.
    pub hostname: String,
    /// Whether this is the processing node hosted inside the server.
    pub internal: bool,
    pub local_version: Version,
}

/// Picks up work while execution slots are free.
pub struct FlowWorker {
    client: Arc<dyn ControlPlane>,
    state: Arc<NodeState>,
    eligibility: Arc<dyn Eligibility>,
    launcher: Arc<dyn RunnerLauncher>,
    slots: Arc<ActiveJobSet>,
    config: FlowWorkerConfig,
    workers_cleared: AtomicBool,
    update_handle: Option<SchedulerHandle>,
}

impl FlowWorker {
    /// Create a worker whose eligibility is the node state itself.
    pub fn new(
        client: Arc<dyn ControlPlane>,
        state: Arc<NodeState>,
        launcher: Arc<dyn RunnerLauncher>,
        config: FlowWorkerConfig,
    ) -> Self {
        Self {
            client,
            eligibility: state.clone(),
            state,
            launcher,
            slots: ActiveJobSet::new(),
            config,
            workers_cleared: AtomicBool::new(false),
            update_handle: None,
        }
    }

    pub fn with_eligibility(mut self, eligibility: Arc<dyn Eligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Handle triggered when the control plane runs a different version.
    pub fn with_update_handle(mut self, handle: SchedulerHandle) -> Self {
        self.update_handle = Some(handle);
        self
    }

    /// The active job set, shared with the update coordinator for draining.
    pub fn slots(&self) -> Arc<ActiveJobSet> {
        self.slots.clone()
    }

    pub fn has_active_runners(&self) -> bool {
        self.slots.has_active_runners()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    async fn fetch_node(&self) -> Result<Node> {
        let node = if self.config.internal {
            self.client.get_server_node().await?
        } else {
            self.client.get_by_address(&self.config.hostname).await?
        };
        Ok(node)
    }

    /// Returns `false` when this node should not take work because the
    /// control plane runs another version.
    async fn version_matches(&self) -> bool {
        let server_version = match self.client.get_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Failed to get control plane version");
                return false;
            }
        };
        if server_version == self.config.local_version {
            return true;
        }

        info!(
            server_version = %server_version,
            local_version = %self.config.local_version,
            "Version mismatch with control plane; requesting update check"
        );
        if let Some(handle) = &self.update_handle {
            handle.trigger();
        }
        false
    }

    async fn clear_workers_once(&self, node: &Node) {
        if self.workers_cleared.load(Ordering::SeqCst) {
            return;
        }
        match self.client.clear_workers(node.uid).await {
            Ok(()) => {
                info!(node_uid = %node.uid, "Cleared stale workers for node");
                self.workers_cleared.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!(node_uid = %node.uid, error = %e, "Failed to clear workers"),
        }
    }

    /// Hand a work item back to the control plane unprocessed.
    async fn return_item(&self, item: &WorkItem) {
        let library_file = item.library_file_uid;
        if let Err(e) = self
            .client
            .update_job_status(library_file, ProcessingStatus::Unprocessed)
            .await
        {
            warn!(%library_file, error = %e, "Failed to return work item");
        }
    }

    fn start_job(
        &self,
        item: WorkItem,
        temp_path: PathBuf,
        guard: SlotGuard,
        poller: SchedulerHandle,
    ) {
        let request = RunnerRequest {
            job_uid: guard.job_uid(),
            library_file_uid: item.library_file_uid,
            temp_path,
            base_url: self.client.base_url().to_string(),
            hostname: (!self.config.internal).then(|| self.config.hostname.clone()),
            is_server: self.config.internal,
        };
        let job = Job {
            client: self.client.clone(),
            launcher: self.launcher.clone(),
            name: item.name,
            request,
        };
        tokio::spawn(job.run(guard, poller));
    }
}

#[async_trait]
impl ScheduledTask for FlowWorker {
    fn name(&self) -> &str {
        "flow-worker"
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        if self.state.is_update_pending() {
            debug!("Update pending; not looking for work");
            return Ok(());
        }
        if !self.eligibility.is_eligible_to_run() {
            debug!("Node not eligible to run work");
            return Ok(());
        }

        let node = match self.fetch_node().await {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "Failed to refresh node from control plane");
                return Ok(());
            }
        };
        if !node.temp_path.trim().is_empty() {
            self.state.set_temp_path(Path::new(&node.temp_path));
        }

        if !self.config.internal && !self.version_matches().await {
            return Ok(());
        }

        self.clear_workers_once(&node).await;

        if !node.enabled {
            debug!(node = %node.name, "Node disabled");
            return Ok(());
        }
        if !ScheduleWindow::new(&node.schedule).allows(Local::now().naive_local()) {
            debug!(node = %node.name, "Outside processing schedule");
            return Ok(());
        }

        let capacity = node.flow_runners as usize;
        let active = self.slots.len();
        if active >= capacity {
            debug!(active, capacity, "All execution slots busy");
            return Ok(());
        }

        if node.temp_path.trim().is_empty() {
            error!(node = %node.name, "Node has no temp path configured");
            return Ok(());
        }
        let temp_path = PathBuf::from(&node.temp_path);
        if let Err(e) = fs::ensure_dir_all_with_op("creating temp directory", &temp_path).await {
            error!(error = %e, "Temp path unavailable");
            return Ok(());
        }

        let request = NextWorkRequest {
            node_name: node.name.clone(),
            node_uid: node.uid,
            worker_uid: Uuid::new_v4(),
        };
        let item = match self.client.get_next(&request).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!("No work available");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Failed to get next work item");
                return Ok(());
            }
        };

        // The update coordinator may have started draining while we waited on the control plane.
        if self.state.is_update_pending() {
            info!(
                library_file = %item.library_file_uid,
                "Update pending; returning claimed work"
            );
            self.return_item(&item).await;
            return Ok(());
        }

        let job_uid = item.uid.unwrap_or_else(Uuid::new_v4);
        let Some(guard) = self.slots.try_claim(job_uid, capacity) else {
            warn!(
                library_file = %item.library_file_uid,
                "No execution slot free for claimed work; returning it"
            );
            self.return_item(&item).await;
            return Ok(());
        };

        self.start_job(item, temp_path, guard, ctx.handle().clone());
        Ok(())
    }
}

/// One running job and what it needs to report back.
struct Job {
    client: Arc<dyn ControlPlane>,
    launcher: Arc<dyn RunnerLauncher>,
    name: String,
    request: RunnerRequest,
}

impl Job {
    async fn run(self, guard: SlotGuard, poller: SchedulerHandle) {
        let job_id = self.request.job_uid;
        let library_file = self.request.library_file_uid;
        info!(%job_id, %library_file, name = %self.name, "Starting flow runner");

        match self.launcher.run(&self.request).await {
            Ok(output) => {
                if let Err(e) = self.client.append_log(library_file, &output.log_block()).await {
                    warn!(%job_id, error = %e, "Failed to upload runner log");
                }
                if output.success() {
                    info!(%job_id, %library_file, "Flow runner finished");
                } else {
                    warn!(
                        %job_id,
                        %library_file,
                        exit_code = ?output.exit_code,
                        "Flow runner failed"
                    );
                    self.mark_failed().await;
                }
            }
            Err(e) => {
                error!(%job_id, %library_file, error = %e, "Failed to run flow runner");
                self.mark_failed().await;
            }
        }

        let job_dir = self.request.job_dir();
        if let Err(e) = fs::remove_dir_all_if_exists(&job_dir).await {
            warn!(%job_id, error = %e, "Failed to remove job directory");
        }

        drop(guard);
        poller.trigger();
    }

    async fn mark_failed(&self) {
        let library_file = self.request.library_file_uid;
        if let Err(e) = self
            .client
            .update_job_status(library_file, ProcessingStatus::ProcessingFailed)
            .await
        {
            warn!(%library_file, error = %e, "Failed to mark library file as failed");
        }
    }
}
