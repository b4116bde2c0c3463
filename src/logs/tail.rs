// src/logs/tail.rs

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::errors::{Result, RuntimeError};
use crate::logs::{LogRecord, LogsOptions, tail_offset};

/// Re-check interval while following, for filesystems where change
/// notification is unavailable or lossy.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const CHANNEL_CAPACITY: usize = 64;

/// Lines of one service's log, produced by a background tail task.
///
/// Dropping the stream or calling [`LogStream::stop`] ends the task.
#[derive(Debug)]
pub struct LogStream {
    service: String,
    rx: mpsc::Receiver<LogRecord>,
    stop_tx: watch::Sender<bool>,
    error: Arc<Mutex<Option<String>>>,
}

impl LogStream {
    /// Open `path` and start tailing it.
    ///
    /// A missing log file is `NotFound`. The starting offset comes from
    /// [`tail_offset`] and may land mid-line.
    pub async fn open(
        service: impl Into<String>,
        path: impl Into<PathBuf>,
        options: LogsOptions,
        avg_line_bytes: u64,
    ) -> Result<Self> {
        let service = service.into();
        let path = path.into();

        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RuntimeError::NotFound(format!(
                    "log file {:?} for service '{}' does not exist",
                    path, service
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let offset = tail_offset(size, options.count, avg_line_bytes);

        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        debug!(service = %service, path = ?path, size, offset, follow = options.stream, "tailing log");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let error = Arc::new(Mutex::new(None));

        let tailer = Tailer {
            service: service.clone(),
            path,
            follow: options.stream,
            tx,
            stop: stop_rx,
            error: Arc::clone(&error),
        };
        tokio::spawn(tailer.run(file));

        Ok(Self {
            service,
            rx,
            stop_tx,
            error,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Next line, or `None` once the stream is stopped or the file is
    /// exhausted (when not following).
    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }

    /// Stop tailing and close the line channel. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        self.rx.close();
        debug!(service = %self.service, "log stream stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Last error hit by the tail task, if any.
    pub fn error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|e| e.clone())
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

enum Wake {
    Changed,
    WatcherGone,
    Stop,
}

struct Tailer {
    service: String,
    path: PathBuf,
    follow: bool,
    tx: mpsc::Sender<LogRecord>,
    stop: watch::Receiver<bool>,
    error: Arc<Mutex<Option<String>>>,
}

impl Tailer {
    async fn run(mut self, file: File) {
        let (_watcher, mut changes) = if self.follow {
            match watch_file(&self.path) {
                Ok((watcher, rx)) => (Some(watcher), Some(rx)),
                Err(e) => {
                    warn!(service = %self.service, error = %e, "file notification unavailable; polling");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        loop {
            if *self.stop.borrow() {
                break;
            }

            let n = match reader.read_until(b'\n', &mut line).await {
                Ok(n) => n,
                Err(e) => {
                    self.record_error(e.to_string());
                    break;
                }
            };

            let complete = line.last() == Some(&b'\n');
            if complete || (n == 0 && !line.is_empty() && !self.follow) {
                if !self.emit(&line).await {
                    break;
                }
                line.clear();
                continue;
            }

            if n == 0 {
                if !self.follow {
                    break;
                }
                if !self.wait_for_change(&mut changes).await {
                    break;
                }
            }
        }

        debug!(service = %self.service, "tail task finished");
    }

    /// Send one line; `false` once the receiver is gone or stop was requested.
    async fn emit(&mut self, raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let message = text.trim_end_matches(['\n', '\r']).to_string();
        tokio::select! {
            sent = self.tx.send(LogRecord { message }) => sent.is_ok(),
            _ = self.stop.changed() => false,
        }
    }

    /// Block until the file may have grown; `false` if stop was requested.
    async fn wait_for_change(&mut self, changes: &mut Option<mpsc::UnboundedReceiver<()>>) -> bool {
        let wake = match changes.as_mut() {
            Some(rx) => tokio::select! {
                event = rx.recv() => if event.is_some() { Wake::Changed } else { Wake::WatcherGone },
                _ = tokio::time::sleep(POLL_INTERVAL) => Wake::Changed,
                res = self.stop.changed() => if res.is_err() { Wake::Stop } else { Wake::Changed },
            },
            None => tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => Wake::Changed,
                res = self.stop.changed() => if res.is_err() { Wake::Stop } else { Wake::Changed },
            },
        };
        if matches!(wake, Wake::WatcherGone) {
            *changes = None;
        }
        !matches!(wake, Wake::Stop) && !*self.stop.borrow() && !self.tx.is_closed()
    }

    fn record_error(&self, message: String) {
        warn!(service = %self.service, error = %message, "tailing failed");
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(message);
        }
    }
}

fn watch_file(path: &Path) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        },
        Config::default(),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}
