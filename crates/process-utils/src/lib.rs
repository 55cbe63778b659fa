//! Child-process helpers for the node agent.
//!
//! Job runners are spawned without a console window on Windows; the update
//! installer is spawned detached so it outlives the process that launched it.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Detach a child from the current process so it survives our exit.
///
/// On Unix the child is moved into its own process group; on Windows it gets
/// a new process group without an attached console. Standard streams are
/// redirected to null in both cases.
pub trait DetachExt {
    fn detached(&mut self) -> &mut Self;
}

impl DetachExt for std::process::Command {
    fn detached(&mut self) -> &mut Self {
        self.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        self
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Build a detached command that runs `script` with the platform shell.
///
/// `.bat` scripts go through `cmd /C`, everything else is executed directly.
pub fn script_command(script: &Path) -> std::process::Command {
    let is_batch = script
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bat") || ext.eq_ignore_ascii_case("cmd"));

    let mut cmd = if is_batch {
        let mut cmd = std_command("cmd");
        cmd.arg("/C").arg(script);
        cmd
    } else {
        std_command(script)
    };

    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }
    cmd.detached();
    cmd
}

/// Mark a file as executable for owner, group and others (`0o755`).
///
/// On non-Unix targets this is a no-op.
pub fn set_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}
