//! Handing off to the installer script.

use std::path::Path;

use tracing::info;

use crate::Result;
use crate::utils::fs;

/// Starts the installer that replaces this node's binaries.
pub trait InstallerLauncher: Send + Sync {
    /// Launch `script` detached, passing `pid` so it can wait for this process to exit.
    fn launch(&self, script: &Path, pid: u32) -> Result<()>;
}

/// Runs the installer script with the platform shell, detached from this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptInstaller;

impl InstallerLauncher for ScriptInstaller {
    fn launch(&self, script: &Path, pid: u32) -> Result<()> {
        let child = process_utils::script_command(script)
            .arg(pid.to_string())
            .spawn()
            .map_err(|e| fs::io_error("launching installer", script, e))?;
        info!(
            script = %script.display(),
            installer_pid = child.id(),
            "Installer launched"
        );
        Ok(())
    }
}
