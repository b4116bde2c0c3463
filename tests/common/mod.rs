#![allow(dead_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devrun::config::RuntimeConfig;
use devrun::runtime::Runtime;

pub use devrun_test_utils::builders;
pub use devrun_test_utils::fake_fetcher::FakeFetcher;
pub use devrun_test_utils::{eventually, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// A runtime wired to a `FakeFetcher` and no builder.
pub fn runtime_with_fake_fetcher(config: RuntimeConfig) -> (Runtime, FakeFetcher) {
    let fetcher = FakeFetcher::new(&config.source_cache_dir).with_file("svc/main.go", "package main");
    let runtime = Runtime::with_components(config, Arc::new(fetcher.clone()), None);
    (runtime, fetcher)
}

/// Whether `git` is available to build fixture repositories.
pub fn have_git() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "devrun")
        .env("GIT_AUTHOR_EMAIL", "devrun@example.com")
        .env("GIT_COMMITTER_NAME", "devrun")
        .env("GIT_COMMITTER_EMAIL", "devrun@example.com")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Upstream repository with a `main` branch holding `svc/main.go`, and a
/// `feature` branch adding `svc/feature.txt`. Returns the head commit of
/// `main`.
pub fn fixture_repo(dir: &Path) -> String {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    write_file(dir, "svc/main.go", "package main\n");
    git(dir, &["add", "."]);
    git(dir, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "initial"]);
    let head = git(dir, &["rev-parse", "HEAD"]);

    git(dir, &["checkout", "-q", "-b", "feature"]);
    write_file(dir, "svc/feature.txt", "feature\n");
    git(dir, &["add", "."]);
    git(dir, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "feature"]);
    git(dir, &["checkout", "-q", "main"]);
    head
}
