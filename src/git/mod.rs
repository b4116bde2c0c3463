// src/git/mod.rs

//! Version-control fetching.
//!
//! The runtime talks to a [`Fetcher`] instead of a concrete git client. Two
//! implementations satisfy it identically:
//!
//! - [`BinaryFetcher`] shells out to the `git` executable.
//! - [`LibraryFetcher`] uses libgit2 in-process.
//!
//! [`new_fetcher`] probes the environment once and picks one. Clones land in
//! a deterministic directory under the source cache, derived from the remote
//! URL by [`dirify`]. Calls against the same destination are not serialized
//! here; callers that race on one repository must serialize themselves.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::source::{LATEST, SourceLocator};

pub mod binary;
pub mod library;

pub use binary::BinaryFetcher;
pub use library::LibraryFetcher;

/// Directory name marking a repository root.
pub const GIT_MARKER: &str = ".git";

/// Branch assumed when a repository does not advertise a default branch.
pub const FALLBACK_BRANCH: &str = "master";

/// A repository present in the source cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub local_path: PathBuf,
    pub remote_url: String,
}

/// Clone / fetch / checkout against a local cache directory.
pub trait Fetcher: Send + Sync + Debug {
    /// Root of the clone cache.
    fn cache_dir(&self) -> &Path;

    /// Clone `remote` into its cache directory. A no-op when the directory
    /// already holds a clone.
    fn clone_repo(&self, remote: &str) -> Result<Repository>;

    /// Update every remote ref without merging. "Already up to date" is
    /// success.
    fn fetch_all(&self, remote: &str) -> Result<()>;

    /// Check out `git_ref`: `latest` is the default branch, a 40-hex value is
    /// a detached commit, anything else a force-checked-out branch.
    fn checkout(&self, remote: &str, git_ref: &str) -> Result<()>;

    /// Repository root enclosing `path`, or `None`.
    fn repo_root(&self, path: &Path) -> Option<PathBuf> {
        repo_root(&RealFileSystem, path)
    }

    /// Deterministic clone destination for `remote`.
    fn destination(&self, remote: &str) -> PathBuf {
        self.cache_dir().join(dirify(remote))
    }
}

/// What a checkout ref resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    DefaultBranch,
    Commit(String),
    Branch(String),
}

impl CheckoutTarget {
    pub fn from_ref(git_ref: &str) -> Self {
        if git_ref == LATEST {
            CheckoutTarget::DefaultBranch
        } else if is_commit(git_ref) {
            CheckoutTarget::Commit(git_ref.to_string())
        } else {
            CheckoutTarget::Branch(git_ref.to_string())
        }
    }
}

/// A full 40-character hexadecimal commit id.
pub fn is_commit(git_ref: &str) -> bool {
    git_ref.len() == 40 && git_ref.chars().all(|c| c.is_ascii_hexdigit())
}

/// Cache directory name for a remote: scheme stripped, `/` replaced by `-`.
pub fn dirify(remote: &str) -> String {
    let stripped = match remote.split_once("://") {
        Some((_, rest)) => rest,
        None => remote,
    };
    stripped.replace('/', "-")
}

/// URL handed to the clone. Remotes without a scheme are fetched over
/// https, except absolute paths which are cloned directly.
pub fn clone_url(remote: &str) -> String {
    if remote.contains("://") || Path::new(remote).is_absolute() {
        remote.to_string()
    } else {
        format!("https://{}", remote)
    }
}

/// Walk up from `path` until a directory containing `.git` is found.
///
/// Reaching the filesystem root without a marker yields `None`.
pub fn repo_root(fs: &dyn FileSystem, path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| !dir.as_os_str().is_empty() && fs.exists(&dir.join(GIT_MARKER)))
        .map(Path::to_path_buf)
}

/// Pick a fetcher implementation for this machine.
///
/// A `git` executable on `PATH` wins; otherwise the in-process libgit2
/// implementation is used.
pub fn new_fetcher(cache_dir: impl Into<PathBuf>) -> Arc<dyn Fetcher> {
    let cache_dir = cache_dir.into();
    match which::which("git") {
        Ok(git) => {
            info!(git = ?git, "using git executable for source fetching");
            Arc::new(BinaryFetcher::new(cache_dir, git))
        }
        Err(e) => {
            info!(reason = %e, "git executable not found; using libgit2");
            Arc::new(LibraryFetcher::new(cache_dir))
        }
    }
}

/// Bring a remote locator onto disk: clone, fetch, check out its ref, and
/// point `full_path` at the service folder inside the clone.
///
/// Local locators are returned untouched. A failure part-way (e.g. the
/// checkout) leaves the clone in place for the next attempt.
pub fn checkout_source(fetcher: &dyn Fetcher, locator: &mut SourceLocator) -> Result<PathBuf> {
    if locator.local {
        if let Some(path) = &locator.full_path {
            return Ok(path.clone());
        }
    }

    let repo = fetcher.clone_repo(&locator.repo)?;
    fetcher.fetch_all(&locator.repo)?;
    fetcher.checkout(&locator.repo, &locator.git_ref)?;

    let full_path = if locator.folder.is_empty() {
        repo.local_path.clone()
    } else {
        repo.local_path.join(&locator.folder)
    };
    debug!(repo = %locator.repo, git_ref = %locator.git_ref, path = ?full_path, "source checked out");

    locator.full_path = Some(full_path.clone());
    Ok(full_path)
}

pub(crate) fn repository_for(fetcher: &dyn Fetcher, remote: &str) -> Repository {
    let local_path = fetcher.destination(remote);
    Repository {
        name: remote
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(remote)
            .trim_end_matches(".git")
            .to_string(),
        local_path,
        remote_url: clone_url(remote),
    }
}
