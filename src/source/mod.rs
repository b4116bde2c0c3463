// src/source/mod.rs

//! Where a service's code comes from.
//!
//! - [`locator`] turns a reference string or local path into a
//!   [`SourceLocator`].
//! - [`entrypoint`] finds the file the toolchain starts a program from.
//! - [`upload`] unpacks `.tar.gz` sources dropped into the upload directory.

pub mod entrypoint;
pub mod locator;
pub mod upload;

pub use locator::{LATEST, SourceLocator};
