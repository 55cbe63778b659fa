//! fileflow-node library crate.
//!
//! The node side of the file-processing orchestrator: periodic schedulers,
//! control-plane registration, bounded execution of flow runner jobs,
//! drained self-update and retention sweeping.

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod retention;
pub mod scheduler;
pub mod update;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
