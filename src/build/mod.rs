// src/build/mod.rs

//! Compiling service source into a native executable.
//!
//! Builders operate on byte streams rather than paths, so the same interface
//! builds from a fresh clone (packed with [`archive::pack_dir`]), an uploaded
//! archive, or a single file.
//!
//! - [`archive`] decodes `none` / `tar` / `zip` sources into a directory.
//! - [`toolchain`] drives the language toolchain's build command.

use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::types::ArchiveKind;

pub mod archive;
pub mod toolchain;

pub use toolchain::ToolchainBuilder;

/// Something that turns source bytes into executable bytes.
pub trait Builder: Send + Sync + std::fmt::Debug {
    /// Build `src`, decoded according to `archive`.
    ///
    /// `entrypoint` is relative to the decoded tree; when `None` it is
    /// discovered. Scratch space is always cleaned up, even on failure.
    fn build(&self, src: &[u8], archive: ArchiveKind, entrypoint: Option<&Path>) -> Result<Vec<u8>>;
}

/// A compiled service binary written to the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub name: String,
    pub binary_path: PathBuf,
    /// Locator, path or upload the source came from.
    pub source_ref: String,
    pub kind: ArchiveKind,
}
