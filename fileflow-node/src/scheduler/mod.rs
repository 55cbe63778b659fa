//! Periodic scheduling shared by every long-running node component.
//!
//! - [`Schedule`]: next-due arithmetic for `Second`/`Minute`/`Hourly`/`Daily` kinds
//! - [`Scheduler`]: single-flight, self-rescheduling executor for a [`ScheduledTask`]
//! - [`SchedulerRegistry`]: owns the started schedulers of a process

mod registry;
mod schedule;
mod service;

pub use registry::SchedulerRegistry;
pub use schedule::{HOURLY_PADDING_SECS, MINUTE_PADDING_SECS, Schedule, ScheduleKind};
pub use service::{ScheduledTask, Scheduler, SchedulerHandle, TaskContext};
