//! Downloading and unpacking a node update.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::client::{ControlPlane, Version};
use crate::utils::fs;
use crate::{Error, Result};

/// Base name of the installer script shipped in the update archive.
pub const DEFAULT_SCRIPT_PREFIX: &str = "node-upgrade";

/// Where an update is downloaded and unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    /// Directory the archive is extracted into.
    pub update_dir: PathBuf,
    /// Downloaded archive, deleted after extraction.
    pub archive_path: PathBuf,
    /// Installer script name without extension.
    pub script_prefix: String,
}

impl PackageLayout {
    /// Layout below `data_dir`: `update/` and `update.zip`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self {
            update_dir: data_dir.join("update"),
            archive_path: data_dir.join("update.zip"),
            script_prefix: DEFAULT_SCRIPT_PREFIX.to_string(),
        }
    }

    /// Installer script for the current platform.
    pub fn script_path(&self) -> PathBuf {
        let extension = if cfg!(windows) { "bat" } else { "sh" };
        self.update_dir.join(format!("{}.{}", self.script_prefix, extension))
    }

    async fn cleanup(&self) {
        if let Err(e) = fs::remove_file_if_exists(&self.archive_path).await {
            warn!(error = %e, "Failed to remove update archive");
        }
        if let Err(e) = fs::remove_dir_all_if_exists(&self.update_dir).await {
            warn!(error = %e, "Failed to remove update directory");
        }
    }
}

/// An unpacked update ready to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePackage {
    pub version: Version,
    pub dir: PathBuf,
    pub script: PathBuf,
}

/// Download, extract and validate the update for `version`.
///
/// On failure every artifact is removed so the next attempt starts clean.
pub async fn prepare_package(
    client: &dyn ControlPlane,
    layout: &PackageLayout,
    version: Version,
) -> Result<UpdatePackage> {
    let result = try_prepare(client, layout, version).await;
    if result.is_err() {
        layout.cleanup().await;
    }
    result
}

async fn try_prepare(
    client: &dyn ControlPlane,
    layout: &PackageLayout,
    version: Version,
) -> Result<UpdatePackage> {
    fs::remove_dir_all_if_exists(&layout.update_dir).await?;

    info!(%version, "Downloading node update");
    let bytes = client.get_update_binary().await?;
    if bytes.is_empty() {
        return Err(Error::update("control plane returned an empty update"));
    }

    if let Some(parent) = layout.archive_path.parent() {
        fs::ensure_dir_all_with_op("creating update parent directory", parent).await?;
    }
    tokio::fs::write(&layout.archive_path, &bytes)
        .await
        .map_err(|e| fs::io_error("writing update archive", &layout.archive_path, e))?;
    debug!(
        path = %layout.archive_path.display(),
        size = bytes.len(),
        "Update archive saved"
    );

    let archive_path = layout.archive_path.clone();
    let update_dir = layout.update_dir.clone();
    tokio::task::spawn_blocking(move || extract(&archive_path, &update_dir))
        .await
        .map_err(|e| Error::update(format!("extraction task failed: {e}")))??;

    fs::remove_file_if_exists(&layout.archive_path).await?;

    let script = layout.script_path();
    if !tokio::fs::try_exists(&script).await.unwrap_or(false) {
        return Err(Error::update(format!(
            "installer script {} not found in update",
            script.display()
        )));
    }
    process_utils::set_executable(&script)
        .map_err(|e| fs::io_error("marking installer executable", &script, e))?;

    info!(%version, script = %script.display(), "Update package ready");
    Ok(UpdatePackage {
        version,
        dir: layout.update_dir.clone(),
        script,
    })
}

fn extract(archive_path: &Path, update_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)
        .map_err(|e| fs::io_error("opening update archive", archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::update(format!("invalid update archive: {e}")))?;
    fs::ensure_dir_all_sync_with_op("creating update directory", update_dir)?;
    archive
        .extract(update_dir)
        .map_err(|e| Error::update(format!("failed to extract update: {e}")))?;
    Ok(())
}
