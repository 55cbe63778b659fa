use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use fileflow_node::agent::NodeAgent;
use fileflow_node::client::Version;
use fileflow_node::config::{NodeConfig, NodeConfigStore};
use fileflow_node::{logging, panic_hook};

/// Processing node for the fileflow orchestrator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Control-plane address, e.g. `myserver`, `myserver:5000` or `https://myserver/`
    #[arg(long, env = "FF_SERVER")]
    server: Option<String>,

    /// Name to register this node under (defaults to the host name)
    #[arg(long, env = "FF_NODE_NAME")]
    name: Option<String>,

    /// Root directory for job working directories
    #[arg(long, env = "FF_TEMP")]
    temp: Option<PathBuf>,

    /// Number of flow runners to run concurrently
    #[arg(long, env = "FF_RUNNERS")]
    runners: Option<u32>,

    /// Directory holding the node configuration and update files
    #[arg(long, env = "FF_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory for log files
    #[arg(long, env = "FF_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Flow runner executable
    #[arg(long, env = "FF_RUNNER")]
    runner: Option<PathBuf>,

    /// Access token sent to the control plane
    #[arg(long, env = "FF_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Run as the processing node hosted inside the server
    #[arg(long, env = "FF_INTERNAL")]
    internal: bool,

    /// Running inside a container; disables self-update
    #[arg(long, env = "FF_DOCKER")]
    docker: bool,
}

impl Cli {
    /// Overlay command-line values on the persisted configuration.
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(server) = self.server {
            // A different address invalidates the previously discovered URL.
            if config.server_address.as_deref() != Some(server.as_str()) {
                config.server_url = None;
            }
            config.server_address = Some(server);
        }
        if let Some(name) = self.name {
            config.node_name = name;
        }
        if let Some(temp) = self.temp {
            config.temp_path = temp;
        }
        if let Some(runners) = self.runners {
            config.flow_runners = runners;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        if let Some(runner) = self.runner {
            config.runner_program = runner;
        }
        if self.access_token.is_some() {
            config.access_token = self.access_token;
        }
        config.data_dir = self.data_dir;
        config.internal |= self.internal;
        config.docker |= self.docker;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let store = NodeConfigStore::in_dir(&cli.data_dir);
    let persisted = store
        .load()
        .await
        .context("loading node configuration")?
        .unwrap_or_default();
    let config = cli.apply(persisted);

    let _log_guard = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    config.validate()?;
    info!(
        version = %Version::current(),
        node = %config.node_name,
        runners = config.flow_runners,
        internal = config.internal,
        "Starting fileflow-node"
    );

    let agent = NodeAgent::new(config, store);
    let state = agent.state();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        state.request_shutdown();
    });

    agent.run().await?;
    info!("fileflow-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
