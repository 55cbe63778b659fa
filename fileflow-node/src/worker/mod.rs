//! Execution slot management.
//!
//! [`FlowWorker`] is the scheduled task that asks the control plane for work
//! and runs each item as an isolated flow runner process, never exceeding the
//! node's configured number of runners.

mod runner;
mod schedule_window;
mod service;
mod slots;

pub use runner::{
    ProcessLauncher, RunnerLauncher, RunnerOutput, RunnerRequest, STDERR_HEADER, STDOUT_HEADER,
};
pub use schedule_window::{SLOTS_PER_WEEK, ScheduleWindow};
pub use service::{FlowWorker, FlowWorkerConfig};
pub use slots::{ActiveJobSet, ActiveRunners, SlotGuard};
