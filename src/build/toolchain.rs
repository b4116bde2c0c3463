// src/build/toolchain.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::build::Builder;
use crate::build::archive::{unpack_tar, unpack_zip, write_single};
use crate::config::Toolchain;
use crate::errors::{Result, RuntimeError};
use crate::fs::RealFileSystem;
use crate::source::entrypoint;
use crate::types::ArchiveKind;

/// Name of the binary the toolchain writes inside the scratch directory.
const OUTPUT_NAME: &str = "output";

/// Builder that shells out to a language toolchain (`go build` by default).
#[derive(Debug, Clone)]
pub struct ToolchainBuilder {
    program: PathBuf,
    toolchain: Toolchain,
    tmp_dir: PathBuf,
}

impl ToolchainBuilder {
    pub fn new(program: impl Into<PathBuf>, toolchain: Toolchain, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            toolchain,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Find the toolchain program and construct a builder for it.
    pub fn locate(toolchain: Toolchain, tmp_dir: impl Into<PathBuf>) -> Result<Self> {
        let program = locate_program(&toolchain)?;
        info!(program = ?program, "located build toolchain");
        Ok(Self::new(program, toolchain, tmp_dir))
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn compile(&self, dir: &Path, entrypoint: Option<&Path>) -> Result<Vec<u8>> {
        let entrypoint = match entrypoint {
            Some(ep) => ep.to_path_buf(),
            None => entrypoint::locate(&RealFileSystem, dir, &self.toolchain.entrypoint_file)?,
        };
        let work_dir = entrypoint::working_dir(dir, &entrypoint);
        let output = dir.join(OUTPUT_NAME);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.toolchain.build_args)
            .arg("-o")
            .arg(&output);
        if self.toolchain.static_link {
            cmd.arg("-ldflags").arg("-extldflags \"-static\"");
        }
        cmd.arg(".")
            .current_dir(&work_dir)
            .envs(self.toolchain.build_env());

        let rendered = format!(
            "{} {}",
            self.program.display(),
            self.toolchain.build_args.join(" ")
        );
        debug!(command = %rendered, dir = ?work_dir, "invoking toolchain build");

        let result = cmd
            .output()
            .map_err(|e| RuntimeError::toolchain(&rendered, e.to_string()))?;
        if !result.status.success() {
            let mut detail = String::from_utf8_lossy(&result.stdout).into_owned();
            detail.push_str(&String::from_utf8_lossy(&result.stderr));
            return Err(RuntimeError::toolchain(rendered, detail));
        }

        Ok(fs::read(&output)?)
    }
}

impl Builder for ToolchainBuilder {
    fn build(&self, src: &[u8], archive: ArchiveKind, entrypoint: Option<&Path>) -> Result<Vec<u8>> {
        // Dropping the TempDir removes it on every return path.
        let scratch = tempfile::Builder::new()
            .prefix("src")
            .tempdir_in(&self.tmp_dir)?;
        let dir = scratch.path();

        match archive {
            ArchiveKind::None => write_single(src, dir, &self.toolchain.entrypoint_file)?,
            ArchiveKind::Tar => unpack_tar(src, dir)?,
            ArchiveKind::Zip => unpack_zip(src, dir)?,
        }

        let bytes = self.compile(dir, entrypoint)?;
        info!(bytes = bytes.len(), archive = ?archive, "build finished");
        Ok(bytes)
    }
}

/// Resolve the toolchain program: `<PROGRAM>ROOT/bin/<program>` if the root
/// variable is set, otherwise a lookup on `PATH`.
pub fn locate_program(toolchain: &Toolchain) -> Result<PathBuf> {
    if let Ok(root) = env::var(toolchain.root_var()) {
        if !root.is_empty() {
            let candidate = Path::new(&root).join("bin").join(&toolchain.program);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    which::which(&toolchain.program).map_err(|e| {
        RuntimeError::toolchain(
            toolchain.program.clone(),
            format!("locating toolchain: {}", e),
        )
    })
}
