//! DOCX to PDF conversion through a headless office suite.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{CONVERTER_BINARY_ENV, ConverterConfig};
use crate::error::{Error, Result};
use crate::process::{ToolSpec, deadline, resolve_binary, run_bounded};
use crate::util;

const CONVERTER: ToolSpec = ToolSpec {
    label: "libreoffice",
    env_var: CONVERTER_BINARY_ENV,
    candidates: &["soffice", "libreoffice"],
};

const FIXED_ARGS: &[&str] = &[
    "--headless",
    "--nologo",
    "--nodefault",
    "--nolockcheck",
    "--norestore",
    "--convert-to",
    "pdf",
];

/// Converts documents to PDF with `soffice --headless --convert-to pdf`.
#[derive(Debug, Clone, Default)]
pub struct DocumentConverter {
    config: ConverterConfig,
    scratch_parent: Option<PathBuf>,
}

impl DocumentConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            config,
            scratch_parent: None,
        }
    }

    /// Create isolated profile directories under `parent` instead of the system temp dir.
    pub fn with_scratch_parent(mut self, parent: Option<PathBuf>) -> Self {
        self.scratch_parent = parent;
        self
    }

    /// Resolve the converter binary for the next call.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        resolve_binary(&CONVERTER, self.config.binary.as_deref()).map_err(|reason| {
            Error::ConversionFailed {
                reason,
                stdout: String::new(),
                stderr: String::new(),
            }
        })
    }

    /// Path the converter writes for `input`: same stem, `.pdf`, inside `out_dir`.
    pub fn output_path(input: &Path, out_dir: &Path) -> Result<PathBuf> {
        let stem = input.file_stem().ok_or_else(|| Error::ConversionFailed {
            reason: format!("input {} has no file name", input.display()),
            stdout: String::new(),
            stderr: String::new(),
        })?;
        let mut name = stem.to_os_string();
        name.push(".pdf");
        Ok(out_dir.join(name))
    }

    /// Convert `input` into `out_dir` and return the produced PDF path.
    ///
    /// A zero exit status is not trusted on its own; the expected output file
    /// has to exist afterwards. The isolated profile directory never shows up
    /// in a diagnostic.
    pub async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf> {
        let expected = Self::output_path(input, out_dir)?;
        let binary = self.resolve_binary()?;

        // a leftover file from an earlier run would mask a failed conversion
        match tokio::fs::remove_file(&expected).await {
            Ok(()) => debug!("Removed stale {}", expected.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let profile = if self.config.isolated_profile {
            Some(util::scratch_dir(
                self.scratch_parent.as_deref(),
                "docfill-profile-",
            )?)
        } else {
            None
        };

        let mut command = Command::new(&binary);
        if let Some(profile) = &profile {
            command.arg(profile_arg(profile.path()));
        }
        command
            .args(FIXED_ARGS)
            .arg("--outdir")
            .arg(out_dir)
            .arg(input);

        info!("Converting {} to PDF", input.display());
        let result = Self::finish(command, &binary, &expected, self.config.timeout_secs).await;
        match &profile {
            Some(profile) => result.map_err(|e| e.redact_scratch(profile.path())),
            None => result,
        }
    }

    async fn finish(
        command: Command,
        binary: &Path,
        expected: &Path,
        timeout_secs: u64,
    ) -> Result<PathBuf> {
        let output = run_bounded(command, deadline(timeout_secs))
            .await
            .map_err(|e| Error::ConversionFailed {
                reason: e.to_string(),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        if !output.success() {
            return Err(Error::ConversionFailed {
                reason: format!("{} exited with {}", binary.display(), output.status),
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
            });
        }

        if !tokio::fs::try_exists(expected).await.unwrap_or(false) {
            return Err(Error::ConversionFailed {
                reason: format!("converted file {} was not created", expected.display()),
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
            });
        }

        debug!("Converted to {}", expected.display());
        Ok(expected.to_path_buf())
    }
}

fn profile_arg(profile: &Path) -> OsString {
    let mut arg = OsString::from("-env:UserInstallation=file://");
    arg.push(profile.join("profile"));
    arg
}
