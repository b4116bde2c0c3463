// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Lower components (locator, fetcher, builder, supervisor) return these
//! errors unwrapped; only the namespace registry reinterprets one of them
//! (an already-exited process while stopping).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A version-control or compiler invocation failed. `detail` carries the
    /// captured stdout+stderr of the tool.
    #[error("Toolchain error: `{command}` failed: {detail}")]
    Toolchain { command: String, detail: String },

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no such process (pid {0})")]
    NoSuchProcess(u32),

    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("process exited with status {code}")]
    Exited { code: i32 },

    #[error("process killed by signal {signal}")]
    Signaled { signal: i32 },
}

impl RuntimeError {
    pub(crate) fn toolchain(command: impl Into<String>, detail: impl Into<String>) -> Self {
        RuntimeError::Toolchain {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
