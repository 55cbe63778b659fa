//! Wire models exchanged with the control plane.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A processing node as the control plane knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub uid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of concurrent runners.
    #[serde(default)]
    pub flow_runners: u32,
    #[serde(default)]
    pub temp_path: String,
    /// Quarter-hour allow/deny bitstring for the week, see [`crate::worker::ScheduleWindow`].
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub version: String,
}

/// Maps a path as seen by the server to the same location on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMapping {
    pub server: String,
    pub local: String,
}

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub address: String,
    pub temp_path: String,
    pub flow_runners: u32,
    pub enabled: bool,
    #[serde(default)]
    pub mappings: Vec<ToolMapping>,
    pub version: String,
    pub operating_system: String,
    pub architecture: String,
}

/// Request for the next unit of work on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextWorkRequest {
    pub node_name: String,
    pub node_uid: Uuid,
    pub worker_uid: Uuid,
}

/// A unit of work handed out by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Job uid assigned by the control plane, if any.
    #[serde(default)]
    pub uid: Option<Uuid>,
    /// Library file to process.
    pub library_file_uid: Uuid,
    #[serde(default)]
    pub name: String,
}

/// Processing status reported back for a library file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Unprocessed,
    Processing,
    Processed,
    ProcessingFailed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Unprocessed => write!(f, "Unprocessed"),
            ProcessingStatus::Processing => write!(f, "Processing"),
            ProcessingStatus::Processed => write!(f, "Processed"),
            ProcessingStatus::ProcessingFailed => write!(f, "ProcessingFailed"),
        }
    }
}

/// Body of a status update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: ProcessingStatus,
}

/// Settings the control plane publishes to nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    #[serde(default)]
    pub auto_update_enabled: bool,
    #[serde(default = "default_log_retention_count")]
    pub log_retention_count: u32,
}

fn default_log_retention_count() -> u32 {
    20
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            auto_update_enabled: false,
            log_retention_count: default_log_retention_count(),
        }
    }
}
