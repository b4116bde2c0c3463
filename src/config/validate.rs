// src/config/validate.rs

use crate::config::model::{Manifest, RawManifest};
use crate::errors::{Result, RuntimeError};

impl TryFrom<RawManifest> for Manifest {
    type Error = RuntimeError;

    fn try_from(raw: RawManifest) -> std::result::Result<Self, Self::Error> {
        validate_manifest(&raw)?;
        Ok(Manifest::new_unchecked(raw.runtime, raw.service))
    }
}

pub fn validate_manifest(manifest: &RawManifest) -> Result<()> {
    ensure_has_services(manifest)?;
    validate_runtime(manifest)?;
    validate_services(manifest)?;
    Ok(())
}

fn ensure_has_services(manifest: &RawManifest) -> Result<()> {
    if manifest.service.is_empty() {
        return Err(RuntimeError::Parse(
            "manifest must contain at least one [service.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_runtime(manifest: &RawManifest) -> Result<()> {
    let rt = &manifest.runtime;
    if rt.average_line_bytes == 0 {
        return Err(RuntimeError::Parse(
            "[runtime].average_line_bytes must be >= 1 (got 0)".to_string(),
        ));
    }
    if rt.default_namespace.trim().is_empty() {
        return Err(RuntimeError::Parse(
            "[runtime].default_namespace must not be empty".to_string(),
        ));
    }
    if rt.toolchain.program.trim().is_empty() {
        return Err(RuntimeError::Parse(
            "[runtime.toolchain].program must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_services(manifest: &RawManifest) -> Result<()> {
    for (name, svc) in manifest.service.iter() {
        if svc.version.trim().is_empty() {
            return Err(RuntimeError::Parse(format!(
                "service '{}' has an empty version",
                name
            )));
        }
        if let Some(ns) = &svc.namespace {
            if ns.trim().is_empty() {
                return Err(RuntimeError::Parse(format!(
                    "service '{}' has an empty namespace",
                    name
                )));
            }
        }
        for key in svc.secrets.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(RuntimeError::Parse(format!(
                    "service '{}' has invalid secret name '{}'",
                    name, key
                )));
            }
        }
        for entry in svc.env.iter() {
            if !entry.contains('=') {
                return Err(RuntimeError::Parse(format!(
                    "service '{}' env entry '{}' is not KEY=VALUE",
                    name, entry
                )));
            }
        }
    }
    Ok(())
}
