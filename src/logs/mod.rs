// src/logs/mod.rs

//! Service output capture and tailing.
//!
//! Every forked service writes its combined stdout/stderr to one append-only
//! file under the log directory ([`sink`]). `Logs()` requests open that file
//! and stream lines from an approximate tail position ([`tail`]).

use std::path::{Path, PathBuf};

pub mod sink;
pub mod tail;

pub use sink::{LogSink, OutputSink};
pub use tail::LogStream;

/// One line of service output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub message: String,
}

/// Options for a `Logs()` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogsOptions {
    /// Keep following the file after reaching its end.
    pub stream: bool,
    /// Roughly how many trailing lines to replay before new output.
    pub count: u64,
}

/// `<log_dir>/<name with "/" replaced by "-">.log`
pub fn log_file_path(log_dir: &Path, service_name: &str) -> PathBuf {
    log_dir.join(format!("{}.log", service_name.replace('/', "-")))
}

/// Byte offset to start tailing from: `clip(size - count * avg_line_bytes, 0, size)`.
///
/// This is an estimate. Files with lines much longer or shorter than
/// `avg_line_bytes` will replay fewer or more lines than `count`.
pub fn tail_offset(size: u64, count: u64, avg_line_bytes: u64) -> u64 {
    size.saturating_sub(count.saturating_mul(avg_line_bytes))
}
