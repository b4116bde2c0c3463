// src/process/mod.rs

//! Process supervision.
//!
//! [`fork`] launches a service in its own process group so that [`kill`] can
//! take down the service together with anything it spawned (`go run` compiles
//! and then execs a child, for instance). [`exec`] is the one-shot
//! counterpart for short commands that run to completion.
//!
//! On platforms without process groups `kill` signals the single process
//! only.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::errors::{ProcessError, Result};

/// What to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Executable {
    pub program: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries added to the inherited environment.
    pub env: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl Executable {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for entry in &self.env {
            match entry.split_once('=') {
                Some((key, value)) => {
                    cmd.env(key, value);
                }
                None => warn!(entry = %entry, "ignoring env entry without '='"),
            }
        }
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// A forked process with its standard streams.
///
/// The streams are `Option`s so callers can take ownership of them.
#[derive(Debug)]
pub struct ProcessHandle {
    pub id: u32,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    child: Child,
}

impl ProcessHandle {
    /// Wait for the process to exit.
    ///
    /// Zero exit is `Ok`; anything else is a [`ProcessError`] carrying the
    /// exit code or terminating signal.
    pub async fn wait(mut self) -> Result<()> {
        let status = self.child.wait().await?;
        debug!(pid = self.id, status = ?status, "process exited");
        exit_result(status)
    }
}

/// Launch `exe` in a new process group with piped standard streams.
pub fn fork(exe: &Executable) -> Result<ProcessHandle> {
    let mut cmd = exe.command();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: exe.program.clone(),
        source,
    })?;

    // `id()` is only `None` after the child has been reaped. A pid of 0
    // would make `kill` signal our own process group.
    let Some(id) = child.id() else {
        return Err(ProcessError::Spawn {
            program: exe.program.clone(),
            source: std::io::Error::other("process was reaped before its pid was read"),
        }
        .into());
    };
    info!(pid = id, program = %exe.program, args = ?exe.args, "forked process");

    Ok(ProcessHandle {
        id,
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
    })
}

/// Run `exe` to completion in the current process group, inheriting stdio.
pub async fn exec(exe: &Executable) -> Result<()> {
    let status = exe
        .command()
        .status()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: exe.program.clone(),
            source,
        })?;
    exit_result(status)
}

/// SIGKILL the process and its whole group.
///
/// A failure to signal the group is ignored (it may be gone already); a
/// failure to signal the process itself is returned, with "no such process"
/// reported as [`ProcessError::NoSuchProcess`].
#[cfg(unix)]
pub fn kill(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    let primary = signal::kill(target, Signal::SIGKILL);
    if let Err(e) = signal::killpg(target, Signal::SIGKILL) {
        debug!(pid, error = %e, "process group kill failed");
    }

    match primary {
        Ok(()) => {
            debug!(pid, "killed process group");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(ProcessError::NoSuchProcess(pid).into()),
        Err(e) => Err(ProcessError::Signal {
            pid,
            reason: e.to_string(),
        }
        .into()),
    }
}

#[cfg(not(unix))]
pub fn kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()?;
    if output.status.success() {
        return Ok(());
    }
    Err(ProcessError::Signal {
        pid,
        reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
    .into())
}

fn exit_result(status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ProcessError::Exited { code }.into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ProcessError::Signaled { signal }.into());
        }
    }

    Err(ProcessError::Exited { code: -1 }.into())
}
