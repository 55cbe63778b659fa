//! In-memory fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agent::NodeState;
use crate::client::{
    ClientError, ClientResult, ControlPlane, NextWorkRequest, Node, NodeSettings,
    ProcessingStatus, RegisterRequest, Version, WorkItem,
};
use crate::utils::http_client::build_client;
use crate::worker::{RunnerLauncher, RunnerOutput, RunnerRequest};
use crate::{Error, Result};

/// HTTP client with the TLS provider installed.
pub fn test_http_client() -> reqwest::Client {
    build_client(Duration::from_secs(5))
}

pub fn test_node(flow_runners: u32, temp_path: &str) -> Node {
    Node {
        uid: Uuid::new_v4(),
        name: "test-node".to_string(),
        address: "test-node".to_string(),
        enabled: true,
        flow_runners,
        temp_path: temp_path.to_string(),
        schedule: String::new(),
        version: Version::current().to_string(),
    }
}

/// Control plane that serves canned answers and records every call.
pub struct FakeControlPlane {
    pub node: Mutex<Node>,
    pub version: Mutex<Version>,
    pub settings: Mutex<NodeSettings>,
    pub work: Mutex<VecDeque<WorkItem>>,
    pub update_binary: Mutex<Option<Bytes>>,
    pub fail_node: AtomicBool,
    pub fail_clear: AtomicBool,
    pub registrations: Mutex<Vec<RegisterRequest>>,
    pub cleared: Mutex<Vec<Uuid>>,
    pub next_requests: Mutex<Vec<NextWorkRequest>>,
    pub statuses: Mutex<Vec<(Uuid, ProcessingStatus)>>,
    pub logs: Mutex<Vec<(Uuid, String)>>,
    pub server_node_calls: AtomicUsize,
    /// Node state flagged update-pending when work is handed out.
    pub pending_on_next: Mutex<Option<Arc<NodeState>>>,
}

impl FakeControlPlane {
    pub fn new(node: Node) -> Self {
        Self {
            node: Mutex::new(node),
            version: Mutex::new(Version::current()),
            settings: Mutex::new(NodeSettings::default()),
            work: Mutex::new(VecDeque::new()),
            update_binary: Mutex::new(None),
            fail_node: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
            registrations: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            next_requests: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            server_node_calls: AtomicUsize::new(0),
            pending_on_next: Mutex::new(None),
        }
    }

    pub fn push_work(&self, name: &str) -> Uuid {
        let uid = Uuid::new_v4();
        self.work.lock().push_back(WorkItem {
            uid: None,
            library_file_uid: uid,
            name: name.to_string(),
        });
        uid
    }

    pub fn next_calls(&self) -> usize {
        self.next_requests.lock().len()
    }

    fn node_result(&self) -> ClientResult<Node> {
        if self.fail_node.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("node lookup failed".to_string()));
        }
        Ok(self.node.lock().clone())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn base_url(&self) -> &str {
        "http://fake-server:5000/"
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<Node> {
        self.registrations.lock().push(request.clone());
        self.node_result()
    }

    async fn get_by_address(&self, _address: &str) -> ClientResult<Node> {
        self.node_result()
    }

    async fn get_server_node(&self) -> ClientResult<Node> {
        self.server_node_calls.fetch_add(1, Ordering::SeqCst);
        self.node_result()
    }

    async fn get_version(&self) -> ClientResult<Version> {
        Ok(*self.version.lock())
    }

    async fn clear_workers(&self, node_uid: Uuid) -> ClientResult<()> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("clear failed".to_string()));
        }
        self.cleared.lock().push(node_uid);
        Ok(())
    }

    async fn get_next(&self, request: &NextWorkRequest) -> ClientResult<Option<WorkItem>> {
        self.next_requests.lock().push(request.clone());
        if let Some(state) = self.pending_on_next.lock().as_ref() {
            state.set_update_pending();
        }
        Ok(self.work.lock().pop_front())
    }

    async fn update_job_status(
        &self,
        library_file_uid: Uuid,
        status: ProcessingStatus,
    ) -> ClientResult<()> {
        self.statuses.lock().push((library_file_uid, status));
        Ok(())
    }

    async fn append_log(&self, library_file_uid: Uuid, log: &str) -> ClientResult<()> {
        self.logs.lock().push((library_file_uid, log.to_string()));
        Ok(())
    }

    async fn get_update_binary(&self) -> ClientResult<Bytes> {
        self.update_binary
            .lock()
            .clone()
            .ok_or_else(|| ClientError::Unavailable("no update published".to_string()))
    }

    async fn get_settings(&self) -> ClientResult<NodeSettings> {
        Ok(self.settings.lock().clone())
    }
}

/// Runner that blocks until released and tracks concurrency.
pub struct FakeLauncher {
    pub exit_code: Option<i32>,
    pub fail_spawn: bool,
    gate: Option<Semaphore>,
    pub started: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub requests: Mutex<Vec<RunnerRequest>>,
}

impl FakeLauncher {
    /// Runner that exits immediately with `exit_code`.
    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            fail_spawn: false,
            gate: None,
            started: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Runner that waits for [`FakeLauncher::release`] before exiting 0.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::exiting(0)
        }
    }

    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::exiting(0)
        }
    }

    pub fn release(&self, jobs: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(jobs);
        }
    }
}

#[async_trait]
impl RunnerLauncher for FakeLauncher {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerOutput> {
        self.requests.lock().push(request.clone());
        if self.fail_spawn {
            return Err(Error::Runner("no such program".to_string()));
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(RunnerOutput {
            exit_code: self.exit_code,
            stdout: format!("processed {}", request.library_file_uid),
            stderr: String::new(),
        })
    }
}
