//! Control-plane client.
//!
//! [`ControlPlane`] is the narrow RPC surface the node consumes; the HTTP
//! implementation lives in [`http`], first-time address discovery in
//! [`discovery`].

pub mod discovery;
mod error;
pub mod http;
mod models;
mod version;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

pub use discovery::{EnteredAddress, discover};
pub use error::{ClientError, ClientResult};
pub use http::HttpControlPlane;
pub use models::{
    NextWorkRequest, Node, NodeSettings, ProcessingStatus, RegisterRequest, StatusUpdate,
    ToolMapping, WorkItem,
};
pub use version::Version;

/// RPC surface of the control plane as consumed by a node.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Base URL the client talks to.
    fn base_url(&self) -> &str;

    /// Register (or re-register) this node.
    async fn register(&self, request: &RegisterRequest) -> ClientResult<Node>;

    /// Fetch a node by its address/name.
    async fn get_by_address(&self, address: &str) -> ClientResult<Node>;

    /// Fetch the internal processing node hosted by the server itself.
    async fn get_server_node(&self) -> ClientResult<Node>;

    async fn get_version(&self) -> ClientResult<Version>;

    /// Drop job records still attributed to `node_uid`.
    async fn clear_workers(&self, node_uid: Uuid) -> ClientResult<()>;

    /// Claim the next eligible unit of work, if any.
    async fn get_next(&self, request: &NextWorkRequest) -> ClientResult<Option<WorkItem>>;

    async fn update_job_status(
        &self,
        library_file_uid: Uuid,
        status: ProcessingStatus,
    ) -> ClientResult<()>;

    /// Append text to the processing log of a library file.
    async fn append_log(&self, library_file_uid: Uuid, log: &str) -> ClientResult<()>;

    /// Download the node update archive.
    async fn get_update_binary(&self) -> ClientResult<Bytes>;

    async fn get_settings(&self) -> ClientResult<NodeSettings>;
}
