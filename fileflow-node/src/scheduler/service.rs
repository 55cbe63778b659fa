//! Self-rescheduling periodic executor.
//!
//! Each [`Scheduler`] owns one timer loop on its own tokio task. On every due
//! time (or [`SchedulerHandle::trigger`]) the loop spawns the task's
//! `execute()` unless a previous run is still in flight, in which case a timed
//! firing is dropped and a trigger is held until that run ends. The next due
//! time is recomputed from the wall clock after every firing.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::schedule::Schedule;
use crate::Result;

/// Work run by a [`Scheduler`] on each due time.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Run one cycle. Errors are logged by the scheduler and never stop it.
    async fn execute(&self, ctx: &TaskContext) -> Result<()>;
}

/// Cloneable handle that can wake a scheduler for an out-of-cycle run.
#[derive(Clone)]
pub struct SchedulerHandle {
    name: Arc<str>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    /// Create a handle not yet attached to a running loop.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Request an immediate run. Multiple requests before the loop wakes
    /// coalesce into one.
    pub fn trigger(&self) {
        debug!(scheduler = %self.name, "Trigger requested");
        self.wake.notify_one();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next trigger.
    #[cfg(test)]
    pub(crate) async fn triggered(&self) {
        self.wake.notified().await;
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Context passed to every execution.
pub struct TaskContext {
    handle: SchedulerHandle,
}

impl TaskContext {
    pub fn new(handle: SchedulerHandle) -> Self {
        Self { handle }
    }

    /// Handle of the scheduler running this task.
    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }
}

/// Clears the single-flight flag when the execution ends, whatever the outcome.
struct ExecutingGuard(Arc<AtomicBool>);

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A periodic, single-flight executor for one [`ScheduledTask`].
pub struct Scheduler {
    schedule: Schedule,
    task: Arc<dyn ScheduledTask>,
    handle: SchedulerHandle,
    executing: Arc<AtomicBool>,
    rerun: Arc<AtomicBool>,
    running: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(schedule: Schedule, task: Arc<dyn ScheduledTask>) -> Self {
        let handle = SchedulerHandle::new(task.name());
        Self::with_handle(schedule, task, handle)
    }

    /// Create a stopped scheduler woken through a pre-built `handle`.
    ///
    /// Lets a task hold the handle of a scheduler created after it.
    pub fn with_handle(
        schedule: Schedule,
        task: Arc<dyn ScheduledTask>,
        handle: SchedulerHandle,
    ) -> Self {
        Self {
            schedule,
            task,
            handle,
            executing: Arc::new(AtomicBool::new(false)),
            rerun: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    /// Start the timer loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            debug!(scheduler = %self.name(), "Scheduler already running");
            return false;
        }

        let token = CancellationToken::new();
        *running = Some(token.clone());
        drop(running);

        info!(
            scheduler = %self.name(),
            kind = %self.schedule.kind,
            interval = self.schedule.interval,
            "Starting scheduler"
        );

        let timer = TimerLoop {
            schedule: self.schedule,
            task: self.task.clone(),
            handle: self.handle.clone(),
            executing: self.executing.clone(),
            rerun: self.rerun.clone(),
        };
        tokio::spawn(timer.run(token));
        true
    }

    /// Stop the timer loop. An execution already in flight runs to completion.
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            info!(scheduler = %self.name(), "Stopping scheduler");
            token.cancel();
        }
    }

    /// Force an out-of-cycle run.
    pub fn trigger(&self) {
        self.handle.trigger();
    }

    /// Handle that other components can use to trigger this scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Whether an execution is currently in flight.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TimerLoop {
    schedule: Schedule,
    task: Arc<dyn ScheduledTask>,
    handle: SchedulerHandle,
    executing: Arc<AtomicBool>,
    /// Set when a trigger arrived during an execution; replayed once it ends.
    rerun: Arc<AtomicBool>,
}

impl TimerLoop {
    async fn run(self, token: CancellationToken) {
        loop {
            let delay = self.schedule.delay_from_now();

            let triggered = tokio::select! {
                _ = token.cancelled() => {
                    debug!(scheduler = %self.handle.name(), "Scheduler loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => false,
                _ = self.handle.wake.notified() => {
                    debug!(scheduler = %self.handle.name(), "Woken for out-of-cycle run");
                    true
                }
            };

            self.fire(triggered);
        }
    }

    fn fire(&self, triggered: bool) {
        // Recorded before the claim so a run ending concurrently still sees it.
        if triggered {
            self.rerun.store(true, Ordering::SeqCst);
        }
        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                scheduler = %self.handle.name(),
                triggered,
                "Previous execution still running; skipping this firing"
            );
            return;
        }
        self.rerun.store(false, Ordering::SeqCst);

        let guard = ExecutingGuard(self.executing.clone());
        let task = self.task.clone();
        let rerun = self.rerun.clone();
        let ctx = TaskContext {
            handle: self.handle.clone(),
        };

        tokio::spawn(async move {
            let result = AssertUnwindSafe(task.execute(&ctx)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        scheduler = %ctx.handle.name(),
                        error = %e,
                        "Scheduled execution failed"
                    );
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&'static str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "<non-string panic>".to_string());
                    warn!(
                        scheduler = %ctx.handle.name(),
                        panic = %message,
                        "Scheduled execution panicked"
                    );
                }
            }

            drop(guard);
            if rerun.swap(false, Ordering::SeqCst) {
                debug!(scheduler = %ctx.handle.name(), "Replaying trigger held during execution");
                ctx.handle.trigger();
            }
        });
    }
}
