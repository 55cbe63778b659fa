//! Retention sweepers.
//!
//! Each sweeper is a [`ScheduledTask`](crate::scheduler::ScheduledTask) that
//! logs every deletion and carries on past per-item failures.

mod config_revisions;
mod log_files;
mod temp_dirs;

pub use config_revisions::{
    CONFIG_CLEANER_HOUR, CURRENT_MARKER, ConfigRevisionCleaner, Revision, revisions_to_delete,
};
pub use log_files::{LogFileCleaner, files_to_delete};
pub use temp_dirs::{JOB_DIR_PREFIX, TEMP_CLEANER_HOUR, TempDirCleaner};
