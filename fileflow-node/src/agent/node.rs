//! The node agent: registers with the control plane, then owns and runs the
//! node's schedulers until shutdown.

use std::sync::Arc;

use tracing::info;

use super::registrar::Registrar;
use super::state::NodeState;
use crate::Result;
use crate::client::{ControlPlane, Version};
use crate::config::{NodeConfig, NodeConfigStore};
use crate::retention::{
    CONFIG_CLEANER_HOUR, ConfigRevisionCleaner, LogFileCleaner, TEMP_CLEANER_HOUR,
    TempDirCleaner,
};
use crate::scheduler::{Schedule, Scheduler, SchedulerHandle, SchedulerRegistry};
use crate::update::{PackageLayout, ScriptInstaller, UpdateConfig, UpdateCoordinator};
use crate::utils::http_client;
use crate::worker::{FlowWorker, FlowWorkerConfig, ProcessLauncher};

const UPDATE_SCHEDULER_NAME: &str = "update-coordinator";

/// Composition root of a processing node.
pub struct NodeAgent {
    config: NodeConfig,
    store: NodeConfigStore,
    state: Arc<NodeState>,
    registry: SchedulerRegistry,
}

impl NodeAgent {
    pub fn new(config: NodeConfig, store: NodeConfigStore) -> Self {
        Self {
            config,
            store,
            state: Arc::new(NodeState::new()),
            registry: SchedulerRegistry::new(),
        }
    }

    /// Shared state, including the shutdown token.
    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    pub fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }

    /// Whether this node replaces itself when the control plane is upgraded.
    /// Containers are updated by pulling a new image and the internal node
    /// ships with the server.
    fn self_update_enabled(&self) -> bool {
        !self.config.docker && !self.config.internal
    }

    /// Register, start every scheduler and run until shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        let http = http_client::build_client(self.config.request_timeout());
        let mut registrar = Registrar::new(
            self.config.clone(),
            self.store.clone(),
            self.state.clone(),
            http,
        );
        let Some(registration) = registrar.register().await else {
            info!("Shutdown requested before registration completed");
            return Ok(());
        };

        let schedulers = self.build_schedulers(registration.client);
        self.registry.start_all(schedulers);
        info!(
            node = %registration.node.name,
            schedulers = ?self.registry.names(),
            "Node agent running"
        );

        self.state.shutdown_token().cancelled().await;

        info!("Shutting down node agent");
        self.registry.stop_all();
        Ok(())
    }

    /// Build the node's schedulers against `client`, stopped.
    pub fn build_schedulers(&self, client: Arc<dyn ControlPlane>) -> Vec<Arc<Scheduler>> {
        let config = &self.config;
        let local_version = Version::current();

        let launcher = Arc::new(ProcessLauncher::new(
            config.runner_program.clone(),
            config.runner_args.clone(),
        ));
        let mut worker = FlowWorker::new(
            client.clone(),
            self.state.clone(),
            launcher,
            FlowWorkerConfig {
                hostname: config.node_name.clone(),
                internal: config.internal,
                local_version,
            },
        );

        let update_handle = SchedulerHandle::new(UPDATE_SCHEDULER_NAME);
        if self.self_update_enabled() {
            worker = worker.with_update_handle(update_handle.clone());
        }
        let slots = worker.slots();

        let mut schedulers = vec![Arc::new(Scheduler::new(
            Schedule::every_seconds(config.worker_interval_secs),
            Arc::new(worker),
        ))];

        if self.self_update_enabled() {
            let coordinator = UpdateCoordinator::new(
                client.clone(),
                self.state.clone(),
                slots.clone(),
                Arc::new(ScriptInstaller),
                UpdateConfig {
                    layout: PackageLayout::in_data_dir(&config.data_dir),
                    local_version,
                    drain_poll: config.drain_poll_interval(),
                },
            );
            schedulers.push(Arc::new(Scheduler::with_handle(
                Schedule::every_minutes(config.update_check_minutes),
                Arc::new(coordinator),
                update_handle,
            )));
        }

        schedulers.push(Arc::new(Scheduler::new(
            Schedule::daily_at(CONFIG_CLEANER_HOUR),
            Arc::new(ConfigRevisionCleaner::new(config.config_root())),
        )));
        schedulers.push(Arc::new(Scheduler::new(
            Schedule::daily_at(TEMP_CLEANER_HOUR),
            Arc::new(TempDirCleaner::new(self.state.clone(), slots)),
        )));
        schedulers.push(Arc::new(Scheduler::new(
            Schedule::every_hours(1),
            Arc::new(LogFileCleaner::new(client, config.log_dir.clone())),
        )));

        schedulers
    }
}
