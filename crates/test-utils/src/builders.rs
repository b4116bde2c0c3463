use std::path::{Path, PathBuf};

use devrun::config::{RuntimeConfig, Toolchain};
use devrun::runtime::ServiceDefinition;

/// Builder for `ServiceDefinition` to simplify test setup.
pub struct ServiceDefinitionBuilder {
    def: ServiceDefinition,
}

impl ServiceDefinitionBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            def: ServiceDefinition::new(name, version),
        }
    }

    pub fn source(mut self, source: impl AsRef<str>) -> Self {
        self.def.source = source.as_ref().to_string();
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.def.command = Some(command.to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.def.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, entry: &str) -> Self {
        self.def.env.push(entry.to_string());
        self
    }

    pub fn secret(mut self, key: &str, value: &str) -> Self {
        self.def.secrets.insert(key.to_string(), value.to_string());
        self
    }

    pub fn entrypoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.def.entrypoint = Some(path.into());
        self
    }

    pub fn build(self) -> ServiceDefinition {
        self.def
    }
}

/// Builder for `RuntimeConfig` rooted in a scratch directory.
///
/// Every directory the runtime writes to lands under `root`, and the
/// toolchain defaults to `sleep 30` so "run from source" works without a
/// compiler installed.
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            config: RuntimeConfig {
                log_dir: root.join("logs"),
                source_cache_dir: root.join("sources"),
                upload_dir: root.join("uploads"),
                artifact_dir: root.join("artifacts"),
                tmp_dir: root.to_path_buf(),
                work_dir: root.to_path_buf(),
                toolchain: Toolchain {
                    program: "sleep".to_string(),
                    run_args: vec!["30".to_string()],
                    ..Toolchain::default()
                },
                ..RuntimeConfig::default()
            },
        }
    }

    pub fn default_namespace(mut self, ns: &str) -> Self {
        self.config.default_namespace = ns.to_string();
        self
    }

    pub fn average_line_bytes(mut self, bytes: u64) -> Self {
        self.config.average_line_bytes = bytes;
        self
    }

    pub fn toolchain(mut self, program: &str, run_args: &[&str]) -> Self {
        self.config.toolchain.program = program.to_string();
        self.config.toolchain.run_args = run_args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn entrypoint_file(mut self, name: &str) -> Self {
        self.config.toolchain.entrypoint_file = name.to_string();
        self
    }

    pub fn prebuild(mut self, val: bool) -> Self {
        self.config.prebuild = val;
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
