// src/git/library.rs

use std::fs;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, Oid};
use tracing::{debug, info};

use crate::errors::{Result, RuntimeError};

use super::{
    CheckoutTarget, FALLBACK_BRANCH, Fetcher, GIT_MARKER, Repository, repository_for,
};

const ORIGIN: &str = "origin";
const FETCH_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

/// Fetcher backed by libgit2, for machines without a `git` executable.
#[derive(Debug, Clone)]
pub struct LibraryFetcher {
    cache_dir: PathBuf,
}

impl LibraryFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn open(&self, remote: &str) -> Result<git2::Repository> {
        let dir = self.destination(remote);
        git2::Repository::open(&dir).map_err(git_error("open"))
    }
}

fn git_error(op: &'static str) -> impl Fn(git2::Error) -> RuntimeError {
    move |e| RuntimeError::toolchain(format!("libgit2 {}", op), e.message().to_string())
}

fn default_branch(repo: &git2::Repository) -> String {
    let origin_head = format!("refs/remotes/{}/HEAD", ORIGIN);
    if let Ok(reference) = repo.find_reference(&origin_head) {
        if let Some(target) = reference.symbolic_target() {
            let prefix = format!("refs/remotes/{}/", ORIGIN);
            return target.strip_prefix(&prefix).unwrap_or(target).to_string();
        }
    }
    repo.head()
        .ok()
        .filter(|head| head.is_branch())
        .and_then(|head| head.shorthand().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_BRANCH.to_string())
}

/// Force the working tree to `commit` while HEAD still names the old tree,
/// so files tracked only by the old tree are removed.
fn force_checkout_tree(repo: &git2::Repository, commit: &git2::Commit<'_>) -> Result<()> {
    let mut opts = CheckoutBuilder::new();
    opts.force();
    repo.checkout_tree(commit.as_object(), Some(&mut opts))
        .map_err(git_error("checkout"))
}

fn checkout_branch(repo: &git2::Repository, branch: &str) -> Result<()> {
    let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, branch);
    let commit = match repo.find_reference(&remote_ref) {
        Ok(reference) => reference.peel_to_commit(),
        Err(_) => repo
            .find_branch(branch, BranchType::Local)
            .and_then(|b| b.get().peel_to_commit()),
    }
    .map_err(git_error("resolve branch"))?;

    force_checkout_tree(repo, &commit)?;
    // A branch that is the current HEAD cannot be force-moved, so detach first.
    repo.set_head_detached(commit.id())
        .map_err(git_error("checkout"))?;
    repo.branch(branch, &commit, true)
        .map_err(git_error("branch"))?;
    repo.set_head(&format!("refs/heads/{}", branch))
        .map_err(git_error("checkout"))
}

impl Fetcher for LibraryFetcher {
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
        git2::Repository::clone(&repo.remote_url, &repo.local_path)
            .map_err(git_error("clone"))?;

        info!(remote, path = ?repo.local_path, "cloned repository");
        Ok(repo)
    }

    fn fetch_all(&self, remote: &str) -> Result<()> {
        let repo = self.open(remote)?;
        let mut origin = repo.find_remote(ORIGIN).map_err(git_error("fetch"))?;
        origin
            .fetch(&[FETCH_REFSPEC], None, None)
            .map_err(git_error("fetch"))?;
        Ok(())
    }

    fn checkout(&self, remote: &str, git_ref: &str) -> Result<()> {
        let repo = self.open(remote)?;
        match CheckoutTarget::from_ref(git_ref) {
            CheckoutTarget::DefaultBranch => {
                let branch = default_branch(&repo);
                checkout_branch(&repo, &branch)?;
            }
            CheckoutTarget::Commit(commit) => {
                let oid = Oid::from_str(&commit).map_err(git_error("parse commit"))?;
                let target = repo.find_commit(oid).map_err(git_error("resolve commit"))?;
                force_checkout_tree(&repo, &target)?;
                repo.set_head_detached(oid).map_err(git_error("checkout"))?;
            }
            CheckoutTarget::Branch(branch) => {
                checkout_branch(&repo, &branch)?;
            }
        }
        info!(remote, git_ref, "checked out");
        Ok(())
    }
}
