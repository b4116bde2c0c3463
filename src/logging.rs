// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The `--log-level` flag wins. Without it, `DEVRUN_LOG` is read as an
//! `EnvFilter` directive string, so `debug` and `devrun::git=trace,warn`
//! both work. With neither, `info`.
//!
//! Events go to stderr; stdout carries the status table and followed
//! service output.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "DEVRUN_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))
}

/// Resolve the filter from the CLI level and the raw `DEVRUN_LOG` value.
pub fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level.as_directive()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {} value {:?}", LOG_ENV_VAR, directives)),
        None => Ok(EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}
