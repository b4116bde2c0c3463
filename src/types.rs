use std::fmt;
use std::str::FromStr;

use crate::errors::RuntimeError;

/// Lifecycle state of a supervised service.
///
/// - `Starting`: the process is being forked.
/// - `Running`: the process is alive (as far as the runtime knows).
/// - `Stopped`: the process was stopped by the runtime, or exited with
///   status zero.
/// - `Crashed`: the process exited non-zero or was killed by a signal
///   outside of Stop/Delete. Crashed services are never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopped,
    Crashed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// How the source bytes handed to a builder are packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveKind {
    /// A single source file, written verbatim.
    #[default]
    None,
    Tar,
    Zip,
}

impl FromStr for ArchiveKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(ArchiveKind::None),
            "tar" => Ok(ArchiveKind::Tar),
            "zip" => Ok(ArchiveKind::Zip),
            other => Err(RuntimeError::Parse(format!(
                "invalid archive kind: {other} (expected \"none\", \"tar\" or \"zip\")"
            ))),
        }
    }
}
