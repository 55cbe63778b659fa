//! Spawning the isolated flow runner process for one job.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use process_utils::tokio_command;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

/// Header placed above the captured standard output.
pub const STDOUT_HEADER: &str = "==================== Standard Output ====================";
/// Header placed above the captured standard error.
pub const STDERR_HEADER: &str = "==================== Standard Error ====================";

/// Everything the runner needs to process one library file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRequest {
    pub job_uid: Uuid,
    pub library_file_uid: Uuid,
    pub temp_path: PathBuf,
    pub base_url: String,
    /// Host name of an external node; `None` for the internal node.
    pub hostname: Option<String>,
    pub is_server: bool,
}

impl RunnerRequest {
    /// Positional flags passed to the runner, in contract order.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--uid".to_string(),
            self.job_uid.to_string(),
            "--libfile".to_string(),
            self.library_file_uid.to_string(),
            "--tempPath".to_string(),
            self.temp_path.to_string_lossy().into_owned(),
            "--baseUrl".to_string(),
            self.base_url.clone(),
        ];
        if let Some(hostname) = &self.hostname {
            args.push("--hostname".to_string());
            args.push(hostname.clone());
        }
        args.push(if self.is_server { "--server" } else { "--notserver" }.to_string());
        args
    }

    /// Working directory of this job below the temp root.
    pub fn job_dir(&self) -> PathBuf {
        self.temp_path.join(format!("Runner-{}", self.job_uid))
    }
}

/// Captured result of a finished runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunnerOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr concatenated under their section headers.
    pub fn log_block(&self) -> String {
        let mut log = String::with_capacity(
            STDOUT_HEADER.len() + STDERR_HEADER.len() + self.stdout.len() + self.stderr.len() + 4,
        );
        log.push_str(STDOUT_HEADER);
        log.push('\n');
        log.push_str(self.stdout.trim_end());
        log.push('\n');
        log.push_str(STDERR_HEADER);
        log.push('\n');
        log.push_str(self.stderr.trim_end());
        log.push('\n');
        log
    }
}

/// Runs a job to completion and captures its output.
#[async_trait]
pub trait RunnerLauncher: Send + Sync {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerOutput>;
}

/// Launches the flow runner as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }
}

#[async_trait]
impl RunnerLauncher for ProcessLauncher {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerOutput> {
        let args = request.args();
        debug!(
            job_id = %request.job_uid,
            program = %self.program.display(),
            args = ?args,
            "Spawning flow runner"
        );

        let output = tokio_command(&self.program)
            .args(&self.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::Runner(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        Ok(RunnerOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
