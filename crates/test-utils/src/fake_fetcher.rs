use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use devrun::errors::{Result, RuntimeError};
use devrun::git::{Fetcher, GIT_MARKER, Repository, clone_url};

/// A fetcher that never touches the network:
/// - records every call as `"<op> <remote> [<ref>]"`
/// - "clones" by creating the destination with a `.git` marker and the
///   configured files
/// - can be told to fail checkouts.
#[derive(Debug, Clone)]
pub struct FakeFetcher {
    cache_dir: PathBuf,
    files: Vec<(PathBuf, String)>,
    fail_checkout: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            files: Vec::new(),
            fail_checkout: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// File written (relative to the clone root) on every fresh clone.
    pub fn with_file(mut self, rel: impl Into<PathBuf>, contents: &str) -> Self {
        self.files.push((rel.into(), contents.to_string()));
        self
    }

    pub fn failing_checkout(mut self) -> Self {
        self.fail_checkout = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Fetcher for FakeFetcher {
    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn clone_repo(&self, remote: &str) -> Result<Repository> {
        self.record(format!("clone {}", remote));
        let local_path = self.destination(remote);
        if !local_path.join(GIT_MARKER).exists() {
            fs::create_dir_all(local_path.join(GIT_MARKER))?;
            for (rel, contents) in &self.files {
                let path = local_path.join(rel);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, contents)?;
            }
        }
        Ok(Repository {
            name: remote.rsplit('/').next().unwrap_or(remote).to_string(),
            local_path,
            remote_url: clone_url(remote),
        })
    }

    fn fetch_all(&self, remote: &str) -> Result<()> {
        self.record(format!("fetch {}", remote));
        Ok(())
    }

    fn checkout(&self, remote: &str, git_ref: &str) -> Result<()> {
        self.record(format!("checkout {} {}", remote, git_ref));
        if self.fail_checkout {
            return Err(RuntimeError::Toolchain {
                command: format!("git checkout {}", git_ref),
                detail: "error: pathspec did not match any file(s) known to git".to_string(),
            });
        }
        Ok(())
    }
}
