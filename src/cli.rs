// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `devrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devrun",
    version,
    about = "Fetch, build and supervise services locally.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the manifest (TOML).
    ///
    /// Default: `devrun.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "devrun.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the services, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Stream every service's log to stdout until Ctrl-C.
    #[arg(long)]
    pub follow: bool,

    /// Approximate number of existing log lines to replay with `--follow`.
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub tail: u64,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The level as an `EnvFilter` directive.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
