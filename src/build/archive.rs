// src/build/archive.rs

//! Decoding source archives into a directory, and packing a directory back
//! into a tar stream for the builder.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path};

use tar::{Archive, Builder, EntryType};
use tracing::debug;

use crate::errors::{Result, RuntimeError};

/// Reject absolute paths, parent components and backslashes.
pub fn valid_rel_path(name: &str) -> bool {
    if name.is_empty() || name.contains('\\') {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Write a single source file verbatim as `dir/file_name`.
pub fn write_single(src: &[u8], dir: &Path, file_name: &str) -> Result<()> {
    fs::write(dir.join(file_name), src)?;
    Ok(())
}

/// Unpack a tar stream into `dir`, preserving relative paths.
pub fn unpack_tar<R: Read>(src: R, dir: &Path) -> Result<()> {
    let mut archive = Archive::new(src);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if !valid_rel_path(&name) {
            return Err(RuntimeError::Parse(format!(
                "tar contained invalid name {:?}",
                name
            )));
        }
        match entry.header().entry_type() {
            EntryType::Directory | EntryType::Regular => {
                entry.unpack_in(dir)?;
            }
            other => debug!(name = %name, kind = ?other, "skipping tar entry"),
        }
    }
    Ok(())
}

/// Unpack a zip archive held in memory into `dir`.
pub fn unpack_zip(src: &[u8], dir: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(src))
        .map_err(|e| RuntimeError::Parse(format!("invalid zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| RuntimeError::Parse(format!("invalid zip entry: {}", e)))?;
        let Some(rel) = file.enclosed_name() else {
            return Err(RuntimeError::Parse(format!(
                "zip contained invalid name {:?}",
                file.name()
            )));
        };
        let target = dir.join(rel);

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)?;
        fs::write(&target, contents)?;
    }
    Ok(())
}

/// Pack the contents of `dir` (not the directory itself) into a tar stream.
///
/// Hidden entries such as `.git` are left out.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    append_dir(&mut builder, dir, Path::new(""))?;
    Ok(builder.into_inner()?)
}

fn append_dir(builder: &mut Builder<Vec<u8>>, dir: &Path, rel: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let rel_path = rel.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&rel_path, &path)?;
            append_dir(builder, &path, &rel_path)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, &rel_path)?;
        }
    }
    Ok(())
}
