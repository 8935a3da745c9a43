use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub(crate) enum ToolchainError {
    #[error("failed to prepare bundling workspace: {0}")]
    Workspace(io::Error),
    #[error("bundling toolchain unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to spawn bundling toolchain: {0}")]
    Spawn(io::Error),
    #[error("bundling toolchain failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to read bundled output: {0}")]
    Read(io::Error),
    #[error("bundling toolchain produced no output")]
    EmptyOutput,
}

/// External bundler invoked as
/// `<program> --input <markup.html> --manifest <fragments.json> --output <bundle.html>`.
///
/// Every invocation gets its own temporary workspace, removed on return, so
/// concurrent documents never share files.
#[derive(Debug, Clone)]
pub(crate) struct Toolchain {
    program: PathBuf,
}

impl Toolchain {
    pub(crate) fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub(crate) fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn bundle(
        &self,
        slug: &str,
        markup: &str,
        manifest: &str,
    ) -> Result<String, ToolchainError> {
        let started_at = Instant::now();
        let workspace = tempfile::Builder::new()
            .prefix("folio-bundle-")
            .tempdir()
            .map_err(ToolchainError::Workspace)?;

        let (input_path, manifest_path, output_path) = stage_inputs(&workspace, markup, manifest)?;

        let output = Command::new(&self.program)
            .arg("--input")
            .arg(&input_path)
            .arg("--manifest")
            .arg(&manifest_path)
            .arg("--output")
            .arg(&output_path)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "application::render::toolchain",
                    slug,
                    result = "error",
                    error_code = "spawn",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to spawn bundling toolchain"
                );
                if err.kind() == ErrorKind::NotFound {
                    ToolchainError::NotFound(err)
                } else {
                    ToolchainError::Spawn(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "application::render::toolchain",
                slug,
                result = "error",
                error_code = "exit_status",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Bundling toolchain failed"
            );
            return Err(ToolchainError::Cli { exit_code, stderr });
        }

        let bundled = fs::read_to_string(&output_path).map_err(ToolchainError::Read)?;
        if bundled.trim().is_empty() {
            return Err(ToolchainError::EmptyOutput);
        }

        info!(
            target = "application::render::toolchain",
            slug,
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = bundled.len(),
            "Document bundled"
        );

        Ok(bundled)
    }
}

fn stage_inputs(
    workspace: &TempDir,
    markup: &str,
    manifest: &str,
) -> Result<(PathBuf, PathBuf, PathBuf), ToolchainError> {
    let input_path = workspace.path().join("markup.html");
    let manifest_path = workspace.path().join("fragments.json");
    let output_path = workspace.path().join("bundle.html");

    fs::write(&input_path, markup).map_err(ToolchainError::Workspace)?;
    fs::write(&manifest_path, manifest).map_err(ToolchainError::Workspace)?;

    Ok((input_path, manifest_path, output_path))
}
