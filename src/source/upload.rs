// src/source/upload.rs

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;

use crate::build::archive::unpack_tar;
use crate::errors::Result;

const UPLOAD_SUFFIX: &str = ".tar.gz";

/// Path of an uploaded archive for `source`, if one was dropped in
/// `upload_dir`.
pub fn uploaded_archive(upload_dir: &Path, source: &str) -> Option<PathBuf> {
    if !source.ends_with(UPLOAD_SUFFIX) {
        return None;
    }
    let path = upload_dir.join(source);
    path.is_file().then_some(path)
}

/// Unpack an uploaded `.tar.gz` next to itself and return the directory.
///
/// The destination is wiped first so files from an earlier upload of the
/// same name never leak into the new tree.
pub fn unpack_upload(archive: &Path) -> Result<PathBuf> {
    let name = archive.to_string_lossy();
    let dest = PathBuf::from(name.trim_end_matches(UPLOAD_SUFFIX));

    if dest.exists() {
        fs::remove_dir_all(&dest)?;
    }
    fs::create_dir_all(&dest)?;

    let reader = GzDecoder::new(BufReader::new(File::open(archive)?));
    unpack_tar(reader, &dest)?;

    info!(archive = ?archive, dest = ?dest, "unpacked uploaded source");
    Ok(dest)
}
