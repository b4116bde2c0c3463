// src/config/mod.rs

//! Configuration for devrun.
//!
//! - `model.rs`: the TOML-backed data model and [`RuntimeConfig`].
//! - `loader.rs`: reading a manifest from disk.
//! - `validate.rs`: semantic checks turning a `RawManifest` into a `Manifest`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{Manifest, RawManifest, RuntimeConfig, ServiceConfig, Toolchain};
pub use validate::validate_manifest;
