// src/runtime/service.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::process::ChildStdin;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::logs::{LogSink, OutputSink};
use crate::process::{self, Executable};
use crate::runtime::{ServiceDefinition, ServiceInfo};
use crate::types::ServiceStatus;

/// How a process ended: `Ok` for exit status zero, otherwise the rendered
/// process error.
type ExitOutcome = std::result::Result<(), String>;

/// The live half of a service: set by `start`, replaced by the next `start`.
///
/// Each start gets its own exit channel, so a wait task belonging to an
/// earlier process can never overwrite the state of a newer one.
struct Process {
    pid: u32,
    started_at: SystemTime,
    exit: watch::Receiver<Option<ExitOutcome>>,
    stop_requested: bool,
    // Held so the child's stdin stays open while it runs.
    _stdin: Option<ChildStdin>,
}

/// A service tracked by the registry.
pub struct RunningService {
    namespace: String,
    definition: ServiceDefinition,
    exe: Executable,
    prebuild: bool,
    log_path: PathBuf,
    output: Option<OutputSink>,
    process: Option<Process>,
    status: ServiceStatus,
    start_error: Option<String>,
}

impl fmt::Debug for RunningService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningService")
            .field("namespace", &self.namespace)
            .field("key", &self.definition.key())
            .field("exe", &self.exe)
            .field("pid", &self.pid())
            .field("status", &self.status())
            .finish()
    }
}

impl RunningService {
    pub fn new(
        namespace: impl Into<String>,
        definition: ServiceDefinition,
        exe: Executable,
        log_path: PathBuf,
        output: Option<OutputSink>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            definition,
            exe,
            prebuild: false,
            log_path,
            output,
            process: None,
            status: ServiceStatus::Stopped,
            start_error: None,
        }
    }

    pub fn with_prebuild(mut self, prebuild: bool) -> Self {
        self.prebuild = prebuild;
        self
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    pub fn executable(&self) -> &Executable {
        &self.exe
    }

    pub fn prebuild(&self) -> bool {
        self.prebuild
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    /// The process has been forked and not yet observed to exit.
    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|p| p.exit.borrow().is_none())
    }

    pub fn status(&self) -> ServiceStatus {
        let Some(p) = &self.process else {
            return self.status;
        };
        match &*p.exit.borrow() {
            None => ServiceStatus::Running,
            Some(_) if p.stop_requested => ServiceStatus::Stopped,
            Some(Ok(())) => ServiceStatus::Stopped,
            Some(Err(_)) => ServiceStatus::Crashed,
        }
    }

    /// Why the last process failed, unless it was stopped on request.
    pub fn error(&self) -> Option<String> {
        if let Some(p) = &self.process {
            if p.stop_requested {
                return None;
            }
            if let Some(Err(e)) = &*p.exit.borrow() {
                return Some(e.clone());
            }
            return None;
        }
        self.start_error.clone()
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            namespace: self.namespace.clone(),
            definition: self.definition.clone(),
            status: self.status(),
            pid: self.pid(),
            started_at: self.process.as_ref().map(|p| p.started_at),
            error: self.error(),
            log_path: self.log_path.clone(),
        }
    }

    /// Point the service at a new source and the command resolved from it.
    pub fn rebind(&mut self, source: impl Into<String>, exe: Executable) {
        self.definition.source = source.into();
        self.exe = exe;
    }

    /// Fork the process, attach its output to the log file, and spawn the
    /// task that waits for it.
    pub async fn start(&mut self) -> Result<()> {
        self.status = ServiceStatus::Starting;
        self.process = None;
        self.start_error = None;

        let name = self.definition.name.clone();
        let sink = LogSink::open(&name, &self.log_path, self.output.clone()).await?;

        let mut handle = match process::fork(&self.exe) {
            Ok(handle) => handle,
            Err(e) => {
                self.status = ServiceStatus::Crashed;
                self.start_error = Some(e.to_string());
                return Err(e);
            }
        };

        if let Some(stdout) = handle.stdout.take() {
            sink.attach("stdout", stdout);
        }
        if let Some(stderr) = handle.stderr.take() {
            sink.attach("stderr", stderr);
        }
        let stdin = handle.stdin.take();
        let pid = handle.id;

        let (exit_tx, exit_rx) = watch::channel(None);
        let namespace = self.namespace.clone();
        tokio::spawn(async move {
            let outcome = handle.wait().await.map_err(|e| e.to_string());
            match &outcome {
                Ok(()) => info!(service = %name, namespace = %namespace, pid, "service exited"),
                Err(e) => warn!(service = %name, namespace = %namespace, pid, error = %e, "service terminated"),
            }
            exit_tx.send_replace(Some(outcome));
        });

        self.process = Some(Process {
            pid,
            started_at: SystemTime::now(),
            exit: exit_rx,
            stop_requested: false,
            _stdin: stdin,
        });
        self.status = ServiceStatus::Running;
        info!(service = %self.definition.name, namespace = %self.namespace, pid, "service started");
        Ok(())
    }

    /// Kill the process group and wait for the process to be reaped.
    ///
    /// A process already observed to exit is left alone. A kill that finds
    /// no such process is returned as-is; the registry decides whether that
    /// matters.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(p) = self.process.as_mut() else {
            self.status = ServiceStatus::Stopped;
            return Ok(());
        };
        if p.exit.borrow().is_some() {
            debug!(service = %self.definition.name, pid = p.pid, "process already exited");
            return Ok(());
        }

        p.stop_requested = true;
        p._stdin = None;
        process::kill(p.pid)?;

        // The wait task always publishes an outcome, unless it was dropped
        // with the runtime.
        let _ = p.exit.wait_for(Option::is_some).await;
        self.status = ServiceStatus::Stopped;
        info!(service = %self.definition.name, namespace = %self.namespace, pid = p.pid, "service stopped");
        Ok(())
    }
}
