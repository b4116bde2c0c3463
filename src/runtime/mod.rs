// src/runtime/mod.rs

//! The namespace registry and the records it owns.
//!
//! - `service.rs`: [`RunningService`], one supervised process plus its log.
//! - `registry.rs`: [`Runtime`], `namespace -> service key -> RunningService`
//!   behind a single read/write lock, with the Create/Read/Update/Delete/Logs
//!   and Start/Stop operations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::logs::OutputSink;
use crate::types::ServiceStatus;

pub mod registry;
pub mod service;

pub use registry::Runtime;
pub use service::RunningService;

/// Caller-supplied description of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub version: String,

    /// Locator, local path, or uploaded archive name. May be empty when an
    /// explicit command is given.
    pub source: String,

    /// Program to run instead of the toolchain's run invocation.
    pub command: Option<String>,
    pub args: Vec<String>,

    /// `KEY=VALUE` entries.
    pub env: Vec<String>,

    /// Flattened into the environment as `KEY=VALUE`.
    pub secrets: BTreeMap<String, String>,

    /// Entrypoint file relative to the source directory; discovered when
    /// absent.
    pub entrypoint: Option<PathBuf>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// `name:version`, unique within a namespace.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// `env` followed by the secrets as `KEY=VALUE`.
    pub fn environment(&self) -> Vec<String> {
        self.env
            .iter()
            .cloned()
            .chain(self.secrets.iter().map(|(k, v)| format!("{}={}", k, v)))
            .collect()
    }
}

/// A network policy. Recognised so callers get a typed rejection rather
/// than a decoding failure; the local runtime does not enforce policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub name: String,
    pub namespace: String,
}

/// Everything Create/Update/Delete can be asked to manage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Service(ServiceDefinition),
    Namespace(String),
    NetworkPolicy(NetworkPolicy),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Service(_) => "service",
            Resource::Namespace(_) => "namespace",
            Resource::NetworkPolicy(_) => "networkpolicy",
        }
    }
}

impl From<ServiceDefinition> for Resource {
    fn from(def: ServiceDefinition) -> Self {
        Resource::Service(def)
    }
}

#[derive(Clone, Default)]
pub struct CreateOptions {
    /// Defaults to the runtime's default namespace.
    pub namespace: Option<String>,

    /// Receives a copy of the service's output besides its log file.
    pub output: Option<OutputSink>,

    /// Overrides the runtime-wide prebuild setting.
    pub prebuild: Option<bool>,
}

impl fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateOptions")
            .field("namespace", &self.namespace)
            .field("output", &self.output.is_some())
            .field("prebuild", &self.prebuild)
            .finish()
    }
}

/// Filter for Read. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub namespace: Option<String>,
}

/// Snapshot of one service returned by Read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub namespace: String,
    pub definition: ServiceDefinition,
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    /// Exit status of a crashed process, or the reason it failed to start.
    pub error: Option<String>,
    pub log_path: PathBuf,
}
