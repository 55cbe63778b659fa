//! Node configuration and its persisted store.
//!
//! The configuration is loaded from `<data_dir>/node.json` when present and
//! overridden by command-line/environment values. The server URL discovered
//! at first registration is written back so later starts skip discovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::ToolMapping;
use crate::utils::fs;
use crate::{Error, Result};

/// File name of the persisted configuration inside the data directory.
pub const CONFIG_FILE_NAME: &str = "node.json";

/// Configuration of one processing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address as entered by the user, e.g. `myserver:5000`. Used for discovery.
    pub server_address: Option<String>,
    /// Control-plane base URL. `None` until the first successful registration.
    pub server_url: Option<String>,
    /// Name this node registers under. Defaults to the host name.
    pub node_name: String,
    /// Root of per-job temporary directories.
    pub temp_path: PathBuf,
    /// Requested number of concurrent runners.
    pub flow_runners: u32,
    pub enabled: bool,
    pub mappings: Vec<ToolMapping>,
    pub access_token: Option<String>,
    /// Flow runner executable.
    pub runner_program: PathBuf,
    /// Arguments placed before the job arguments, e.g. a script path.
    pub runner_args: Vec<String>,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// This node is the processing node hosted inside the server.
    pub internal: bool,
    /// Running inside a container image; self-update is left to the image.
    pub docker: bool,
    pub worker_interval_secs: u32,
    pub update_check_minutes: u32,
    pub drain_poll_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            server_url: None,
            node_name: default_node_name(),
            temp_path: std::env::temp_dir().join("fileflow"),
            flow_runners: 1,
            enabled: true,
            mappings: Vec::new(),
            access_token: None,
            runner_program: PathBuf::from("fileflow-runner"),
            runner_args: Vec::new(),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            internal: false,
            docker: false,
            worker_interval_secs: 10,
            update_check_minutes: 5,
            drain_poll_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Host name of this machine, or `"node"` when it cannot be determined.
pub fn default_node_name() -> String {
    sysinfo::System::host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "node".to_string())
}

impl NodeConfig {
    /// Directory holding numbered configuration revisions.
    pub fn config_root(&self) -> PathBuf {
        self.data_dir.join("config")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_secs(self.drain_poll_secs.max(1))
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::config("node name must not be empty"));
        }
        if self.flow_runners == 0 {
            return Err(Error::config("flow_runners must be at least 1"));
        }
        if self.server_url.is_none() && self.server_address.is_none() {
            return Err(Error::config("no control plane address configured"));
        }
        if self.runner_program.as_os_str().is_empty() {
            return Err(Error::config("runner program must be set"));
        }
        Ok(())
    }
}

/// Loads and saves [`NodeConfig`] as JSON.
#[derive(Debug, Clone)]
pub struct NodeConfigStore {
    path: PathBuf,
}

impl NodeConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located in `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored configuration; `None` when nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<NodeConfig>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted node configuration");
                return Ok(None);
            }
            Err(e) => return Err(fs::io_error("reading node configuration", &self.path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write the configuration, replacing the previous file atomically.
    pub async fn save(&self, config: &NodeConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::ensure_dir_all_with_op("creating config directory", parent).await?;
        }

        let json = serde_json::to_vec_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| fs::io_error("writing node configuration", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| fs::io_error("replacing node configuration", &self.path, e))?;

        info!(path = %self.path.display(), "Saved node configuration");
        Ok(())
    }
}
