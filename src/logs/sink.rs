// src/logs/sink.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::Result;

/// Caller-attached writer receiving a copy of a service's output.
pub type OutputSink = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

const CHUNK: usize = 8 * 1024;

/// Duplicates a service's output into its log file and an optional caller
/// sink.
#[derive(Clone)]
pub struct LogSink {
    service: String,
    path: PathBuf,
    output: Option<OutputSink>,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("service", &self.service)
            .field("path", &self.path)
            .field("output", &self.output.is_some())
            .finish()
    }
}

impl LogSink {
    /// Create the log directory and file (append mode) for `service`.
    pub async fn open(
        service: impl Into<String>,
        path: impl Into<PathBuf>,
        output: Option<OutputSink>,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Touch the file so Logs() works before the first line arrives.
        open_append(&path).await?;
        Ok(Self {
            service: service.into(),
            path,
            output,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn a task copying `reader` into the log file until EOF.
    ///
    /// Each attached stream gets its own append handle; appends of a single
    /// chunk never interleave.
    pub fn attach<R>(&self, stream: &'static str, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.copy(stream, reader).await {
                warn!(service = %sink.service, stream, error = %e, "log copy failed");
            }
            debug!(service = %sink.service, stream, "log copy finished");
        });
    }

    async fn copy<R>(&self, stream: &'static str, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = open_append(&self.path).await?;
        let mut output = self.output.clone();
        let mut buf = vec![0u8; CHUNK];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            file.flush().await?;

            if let Some(out) = output.clone() {
                if let Err(e) = write_output(&out, &buf[..n]).await {
                    warn!(service = %self.service, stream, error = %e, "detaching output sink");
                    output = None;
                }
            }
        }
        Ok(())
    }
}

async fn write_output(out: &OutputSink, bytes: &[u8]) -> std::io::Result<()> {
    let mut writer = out.lock().await;
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}
