// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::runtime::ServiceDefinition;

/// Runtime configuration handed to [`crate::runtime::Runtime::new`].
///
/// Every directory the runtime touches is named here; nothing is derived
/// from process-global state after construction.
///
/// ```toml
/// [runtime]
/// log_dir = "/tmp/devrun/logs"
/// catalog = "github.com/micro/services"
/// average_line_bytes = 200
///
/// [runtime.toolchain]
/// program = "go"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one `<service>.log` file per service name.
    pub log_dir: PathBuf,

    /// Clone destination root for remote sources.
    pub source_cache_dir: PathBuf,

    /// Directory where uploaded `.tar.gz` sources are dropped.
    pub upload_dir: PathBuf,

    /// Where prebuilt service binaries are written.
    pub artifact_dir: PathBuf,

    /// Parent of the per-build scratch directories.
    pub tmp_dir: PathBuf,

    /// Base for resolving relative local sources.
    pub work_dir: PathBuf,

    /// Repository that bare service names expand against.
    pub catalog: String,

    pub default_namespace: String,

    /// Estimated bytes per log line, used to turn a line count into a seek
    /// offset when tailing.
    pub average_line_bytes: u64,

    /// Compile services before running them instead of running from source.
    pub prebuild: bool,

    pub toolchain: Toolchain,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("devrun");
        Self {
            log_dir: base.join("logs"),
            source_cache_dir: base.join("sources"),
            upload_dir: base.join("uploads"),
            artifact_dir: base.join("artifacts"),
            tmp_dir: std::env::temp_dir(),
            work_dir: PathBuf::from("."),
            catalog: DEFAULT_CATALOG.to_string(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            average_line_bytes: DEFAULT_AVERAGE_LINE_BYTES,
            prebuild: false,
            toolchain: Toolchain::default(),
        }
    }
}

pub const DEFAULT_CATALOG: &str = "github.com/micro/services";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_AVERAGE_LINE_BYTES: u64 = 200;

/// The language toolchain used to run and compile services.
///
/// Defaults describe the Go toolchain: `go run .` from the entrypoint
/// directory, and `go build` for a static `linux/amd64` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub program: String,

    /// File name that marks a program's starting point.
    pub entrypoint_file: String,

    /// Arguments for the "run from source" invocation.
    pub run_args: Vec<String>,

    /// Arguments preceding `-o <output>` in the build invocation.
    pub build_args: Vec<String>,

    pub target_os: String,
    pub target_arch: String,
    pub static_link: bool,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            entrypoint_file: "main.go".to_string(),
            run_args: vec!["run".to_string(), ".".to_string()],
            build_args: vec!["build".to_string()],
            target_os: "linux".to_string(),
            target_arch: "amd64".to_string(),
            static_link: true,
        }
    }
}

impl Toolchain {
    /// Environment variables pinning the build target.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("GOOS".to_string(), self.target_os.clone()),
            ("GOARCH".to_string(), self.target_arch.clone()),
        ];
        if self.static_link {
            env.push(("CGO_ENABLED".to_string(), "0".to_string()));
        }
        env
    }

    /// Name of the environment variable pointing at the toolchain root,
    /// e.g. `GOROOT` for `go`.
    pub fn root_var(&self) -> String {
        format!("{}ROOT", self.program.to_uppercase())
    }
}

/// Manifest exactly as decoded from TOML, before validation.
///
/// ```toml
/// [service.echo]
/// source = "./echo"
/// version = "v1"
/// namespace = "dev"
/// secrets = { TOKEN = "abc" }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawManifest {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Services keyed by name.
    #[serde(default)]
    pub service: BTreeMap<String, ServiceConfig>,
}

/// Validated manifest. Only constructible through `TryFrom<RawManifest>`.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub runtime: RuntimeConfig,
    pub service: BTreeMap<String, ServiceConfig>,
}

impl Manifest {
    pub(crate) fn new_unchecked(
        runtime: RuntimeConfig,
        service: BTreeMap<String, ServiceConfig>,
    ) -> Self {
        Self { runtime, service }
    }
}

/// `[service.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Locator or local path. Empty for services without source.
    #[serde(default)]
    pub source: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Falls back to `runtime.default_namespace`.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Explicit command; when absent the toolchain's run invocation is used.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Entrypoint relative to the source directory.
    #[serde(default)]
    pub entrypoint: Option<PathBuf>,

    /// Overrides `runtime.prebuild` for this service.
    #[serde(default)]
    pub prebuild: Option<bool>,
}

fn default_version() -> String {
    "latest".to_string()
}

impl ServiceConfig {
    pub fn effective_namespace<'a>(&'a self, runtime: &'a RuntimeConfig) -> &'a str {
        self.namespace
            .as_deref()
            .unwrap_or(runtime.default_namespace.as_str())
    }

    pub fn to_definition(&self, name: &str) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            version: self.version.clone(),
            source: self.source.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            secrets: self.secrets.clone(),
            entrypoint: self.entrypoint.clone(),
        }
    }
}
