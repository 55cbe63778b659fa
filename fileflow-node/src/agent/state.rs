//! Shared node state passed explicitly to the components that need it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capability the worker asks before looking for work.
pub trait Eligibility: Send + Sync {
    fn is_eligible_to_run(&self) -> bool;
}

impl<F> Eligibility for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_eligible_to_run(&self) -> bool {
        self()
    }
}

/// Process-wide flags and cached values for one node agent.
#[derive(Debug, Default)]
pub struct NodeState {
    update_pending: AtomicBool,
    registered: AtomicBool,
    temp_path: RwLock<Option<PathBuf>>,
    shutdown: CancellationToken,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a drained self-update is in progress. Once set, no new work is taken.
    pub fn is_update_pending(&self) -> bool {
        self.update_pending.load(Ordering::SeqCst)
    }

    pub fn set_update_pending(&self) {
        if !self.update_pending.swap(true, Ordering::SeqCst) {
            info!("Update pending; no new work will be accepted");
        }
    }

    /// Withdraw a pending update that could not be handed off.
    pub fn clear_update_pending(&self) {
        if self.update_pending.swap(false, Ordering::SeqCst) {
            info!("Update withdrawn; accepting work again");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Temp path from the most recent node refresh.
    pub fn temp_path(&self) -> Option<PathBuf> {
        self.temp_path.read().clone()
    }

    pub fn set_temp_path(&self, path: &Path) {
        let mut current = self.temp_path.write();
        if current.as_deref() != Some(path) {
            *current = Some(path.to_path_buf());
        }
    }

    /// Token cancelled when the process should exit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Eligibility for NodeState {
    /// A node may run work once it is registered and no update is pending.
    fn is_eligible_to_run(&self) -> bool {
        self.is_registered() && !self.is_update_pending() && !self.is_shutting_down()
    }
}
