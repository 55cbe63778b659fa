//! Registry of the schedulers started by one node process.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::service::Scheduler;

/// Owns every started [`Scheduler`] so they can be stopped together at shutdown.
#[derive(Default)]
pub struct SchedulerRegistry {
    schedulers: Mutex<Vec<Arc<Scheduler>>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start each scheduler. Schedulers already registered are
    /// left alone, and starting one that is already running is a no-op.
    pub fn start_all(&self, schedulers: impl IntoIterator<Item = Arc<Scheduler>>) {
        let mut registered = self.schedulers.lock();
        for scheduler in schedulers {
            if registered.iter().any(|s| Arc::ptr_eq(s, &scheduler)) {
                continue;
            }
            scheduler.start();
            registered.push(scheduler);
        }
    }

    /// Stop and forget every registered scheduler.
    pub fn stop_all(&self) {
        let schedulers = std::mem::take(&mut *self.schedulers.lock());
        if schedulers.is_empty() {
            return;
        }
        info!(count = schedulers.len(), "Stopping all schedulers");
        for scheduler in schedulers {
            scheduler.stop();
        }
    }

    /// Names of the registered schedulers, in start order.
    pub fn names(&self) -> Vec<String> {
        self.schedulers
            .lock()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.schedulers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.lock().is_empty()
    }
}
