// src/source/entrypoint.rs

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, RuntimeError};
use crate::fs::FileSystem;

/// Directories never searched for entrypoints.
const SKIPPED_DIRS: &[&str] = &["vendor", "node_modules", "testdata"];

/// Locate the single entrypoint file of a source tree.
///
/// A top-level `entrypoint_file` wins outright. Otherwise the tree is
/// searched (hidden and vendored directories excluded) and exactly one match
/// must exist: zero matches is `NotFound`, more than one is a `Parse` error
/// listing the candidates. The returned path is relative to `dir`.
pub fn locate(fs: &dyn FileSystem, dir: &Path, entrypoint_file: &str) -> Result<PathBuf> {
    if fs.is_file(&dir.join(entrypoint_file)) {
        return Ok(PathBuf::from(entrypoint_file));
    }

    let mut found = Vec::new();
    collect(fs, dir, entrypoint_file, &mut found)?;
    debug!(dir = ?dir, candidates = ?found, "entrypoint search finished");

    match found.len() {
        0 => Err(RuntimeError::NotFound(format!(
            "no {} entrypoint found in {:?}",
            entrypoint_file, dir
        ))),
        1 => {
            let path = found.remove(0);
            Ok(path
                .strip_prefix(dir)
                .map(Path::to_path_buf)
                .unwrap_or(path))
        }
        _ => {
            let names: Vec<String> = found
                .iter()
                .map(|p| {
                    p.strip_prefix(dir)
                        .unwrap_or(p)
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            Err(RuntimeError::Parse(format!(
                "multiple entrypoints found in {:?}: {}",
                dir,
                names.join(", ")
            )))
        }
    }
}

fn collect(
    fs: &dyn FileSystem,
    dir: &Path,
    entrypoint_file: &str,
    found: &mut Vec<PathBuf>,
) -> Result<()> {
    for path in fs.read_dir(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if fs.is_dir(&path) {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
                continue;
            }
            collect(fs, &path, entrypoint_file, found)?;
        } else if name == entrypoint_file {
            found.push(path);
        }
    }
    Ok(())
}

/// Directory the toolchain should run in for a given entrypoint.
pub fn working_dir(source_dir: &Path, entrypoint: &Path) -> PathBuf {
    match entrypoint.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => source_dir.join(parent),
        _ => source_dir.to_path_buf(),
    }
}
