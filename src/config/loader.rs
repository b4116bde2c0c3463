// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{Manifest, RawManifest};
use crate::errors::Result;

/// Decode a manifest from a path without semantic validation.
///
/// Use [`load_and_validate`] unless you need the raw document.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawManifest> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawManifest> {
    let manifest: RawManifest = toml::from_str(contents)?;
    Ok(manifest)
}

/// Load a manifest and validate it.
///
/// Relative `work_dir` values are resolved against the manifest's own
/// directory so `source = "./echo"` means "next to devrun.toml".
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Manifest> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;
    if raw.runtime.work_dir.is_relative() {
        raw.runtime.work_dir = manifest_root_dir(path).join(&raw.runtime.work_dir);
    }
    Manifest::try_from(raw)
}

/// Directory containing the manifest, or the current directory for a bare
/// file name.
fn manifest_root_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
