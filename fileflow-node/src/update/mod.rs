//! Self-update.
//!
//! [`UpdateCoordinator`] checks the control plane for a newer release, unpacks
//! it, stops taking work, waits for running jobs to finish and then hands
//! over to the installer script before shutting the node down.

mod installer;
mod package;
mod service;

pub use installer::{InstallerLauncher, ScriptInstaller};
pub use package::{DEFAULT_SCRIPT_PREFIX, PackageLayout, UpdatePackage, prepare_package};
pub use service::{UpdateConfig, UpdateCoordinator};
