// src/source/locator.rs

//! Parsing of service source references.
//!
//! Grammar: `[host/]org/repo/folder[@ref]`, or a bare `name[@ref]` that
//! expands against the catalog repository. A missing ref means `"latest"`.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{Result, RuntimeError};
use crate::fs::FileSystem;
use crate::git::repo_root;

/// Ref meaning "the default branch of the repository".
pub const LATEST: &str = "latest";

/// Host assumed when a locator starts with `org/repo` instead of a hostname.
///
/// A first segment is taken as a hostname when it contains a `.` or a `:`
/// (`github.com`, `localhost:3000`).
pub const DEFAULT_HOST: &str = "github.com";

/// Structured form of a source reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocator {
    /// Repository address without scheme, e.g. `github.com/micro/services`.
    /// Empty for local sources.
    pub repo: String,

    /// Path of the service inside the repository (or the local folder name).
    pub folder: String,

    pub git_ref: String,

    /// The source is a directory on this machine.
    pub local: bool,

    /// Absolute path of the service directory once it is on disk.
    pub full_path: Option<PathBuf>,

    /// Repository root enclosing a local source, if any.
    pub local_repo_root: Option<PathBuf>,
}

impl SourceLocator {
    /// Parse a remote locator. `catalog` is the repository bare names
    /// expand against.
    pub fn parse(source: &str, catalog: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(RuntimeError::Parse("empty source locator".to_string()));
        }

        let (path, git_ref) = match source.split_once('@') {
            Some((path, r)) if !r.is_empty() => (path, r),
            Some((path, _)) => (path, LATEST),
            None => (source, LATEST),
        };

        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let (repo, folder) = match segments.as_slice() {
            [] => {
                return Err(RuntimeError::Parse(format!(
                    "source locator '{}' has no path",
                    source
                )));
            }
            [name] => (catalog.trim_matches('/').to_string(), name.to_string()),
            [host, rest @ ..] if is_host(host) => {
                if rest.len() < 2 {
                    return Err(RuntimeError::Parse(format!(
                        "source locator '{}' is missing an org/repo after the host",
                        source
                    )));
                }
                (segments[..3].join("/"), segments[3..].join("/"))
            }
            [org, repo, rest @ ..] => (
                format!("{}/{}/{}", DEFAULT_HOST, org, repo),
                rest.join("/"),
            ),
        };

        Ok(Self {
            repo,
            folder,
            git_ref: git_ref.to_string(),
            ..Default::default()
        })
    }

    /// Parse a source that may be a local directory.
    ///
    /// If `source` exists on disk (absolute, or relative to `work_dir`) the
    /// locator is marked local, its repository root is found by walking up
    /// to a `.git` marker, and the folder is the path below that root. With
    /// no enclosing repository the folder is the directory's base name.
    pub fn parse_local(
        fs: &dyn FileSystem,
        work_dir: &Path,
        source: &str,
        catalog: &str,
    ) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(RuntimeError::Parse("empty source locator".to_string()));
        }

        let Some(full_path) = local_path(fs, work_dir, source) else {
            return Self::parse(source, catalog);
        };

        let root = repo_root(fs, &full_path);
        let folder = match &root {
            Some(root) => full_path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default(),
            None => base_name(&full_path),
        };

        Ok(Self {
            repo: String::new(),
            folder,
            git_ref: LATEST.to_string(),
            local: true,
            full_path: Some(full_path),
            local_repo_root: root,
        })
    }

    /// Name used for the service when none is given, e.g. `api` for
    /// `github.com/org/repo/helloworld/api`.
    pub fn runtime_name(&self) -> String {
        if self.folder.is_empty() {
            return last_segment(&self.repo);
        }
        last_segment(&self.folder)
    }

    /// Source string to hand to Create/Update/Delete: the full path for
    /// local sources, `repo[/folder]` otherwise.
    pub fn runtime_source(&self) -> String {
        if self.local {
            if let Some(path) = &self.full_path {
                return path.to_string_lossy().into_owned();
            }
        }
        if self.folder.is_empty() {
            return self.repo.clone();
        }
        format!("{}/{}", self.repo, self.folder)
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local {
            return write!(f, "{}", self.runtime_source());
        }
        write!(f, "{}@{}", self.runtime_source(), self.git_ref)
    }
}

/// Returns the full path of `source` if it names an existing local path.
pub fn local_path(fs: &dyn FileSystem, work_dir: &Path, source: &str) -> Option<PathBuf> {
    let candidate = Path::new(source);
    if candidate.is_absolute() {
        return fs.exists(candidate).then(|| candidate.to_path_buf());
    }
    let joined = work_dir.join(candidate);
    fs.exists(&joined).then_some(joined)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn last_segment(s: &str) -> String {
    s.rsplit('/').next().unwrap_or_default().to_string()
}

fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}
