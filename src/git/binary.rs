// src/git/binary.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::errors::{Result, RuntimeError};

use super::{
    CheckoutTarget, FALLBACK_BRANCH, Fetcher, GIT_MARKER, Repository, repository_for,
};

/// Fetcher backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct BinaryFetcher {
    cache_dir: PathBuf,
    git: PathBuf,
}

impl BinaryFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, git: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            git: git.into(),
        }
    }

    /// Run git and return its trimmed stdout. A non-zero exit becomes a
    /// toolchain error carrying stdout and stderr.
    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.git);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let rendered = format!("git {}", args.join(" "));
        debug!(command = %rendered, dir = ?dir, "running git");

        let output = cmd
            .output()
            .map_err(|e| RuntimeError::toolchain(&rendered, e.to_string()))?;

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
            detail.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(RuntimeError::toolchain(rendered, detail.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn default_branch(&self, dir: &Path) -> String {
        match self.run(Some(dir), &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"]) {
            Ok(head) => head
                .strip_prefix("origin/")
                .unwrap_or(&head)
                .to_string(),
            Err(_) => FALLBACK_BRANCH.to_string(),
        }
    }

    fn has_remote_branch(&self, dir: &Path, branch: &str) -> bool {
        let remote_ref = format!("refs/remotes/origin/{}", branch);
        self.run(Some(dir), &["rev-parse", "--verify", "--quiet", &remote_ref])
            .is_ok()
    }

    fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        if self.has_remote_branch(dir, branch) {
            let upstream = format!("origin/{}", branch);
            self.run(Some(dir), &["checkout", "-f", "-B", branch, &upstream])?;
        } else {
            self.run(Some(dir), &["checkout", "-f", branch])?;
        }
        Ok(())
    }
}

impl Fetcher for BinaryFetcher {
    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn clone_repo(&self, remote: &str) -> Result<Repository> {
        let repo = repository_for(self, remote);
        if repo.local_path.join(GIT_MARKER).exists() {
            debug!(remote, path = ?repo.local_path, "already cloned");
            return Ok(repo);
        }

        fs::create_dir_all(&self.cache_dir)?;
        let dest = repo.local_path.to_string_lossy().into_owned();
        self.run(None, &["clone", &repo.remote_url, &dest])?;

        info!(remote, path = ?repo.local_path, "cloned repository");
        Ok(repo)
    }

    fn fetch_all(&self, remote: &str) -> Result<()> {
        let dir = self.destination(remote);
        self.run(Some(&dir), &["fetch", "--all"])?;
        Ok(())
    }

    fn checkout(&self, remote: &str, git_ref: &str) -> Result<()> {
        let dir = self.destination(remote);
        match CheckoutTarget::from_ref(git_ref) {
            CheckoutTarget::DefaultBranch => {
                let branch = self.default_branch(&dir);
                self.checkout_branch(&dir, &branch)?;
            }
            CheckoutTarget::Commit(commit) => {
                self.run(Some(&dir), &["checkout", "-f", "--detach", &commit])?;
            }
            CheckoutTarget::Branch(branch) => {
                self.checkout_branch(&dir, &branch)?;
            }
        }
        info!(remote, git_ref, "checked out");
        Ok(())
    }
}
