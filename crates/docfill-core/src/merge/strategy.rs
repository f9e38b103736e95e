use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::{
    GHOSTSCRIPT_BINARY_ENV, LIBRARY_DIR_ENV, MergeConfig, NODE_BINARY_ENV, PDFUNITE_BINARY_ENV,
};
use crate::process::{ToolSpec, resolve_binary};

/// External tools able to concatenate PDFs, tried in [`MergeStrategy::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStrategy {
    /// `node merge_pdf.js <output> <inputs...>` with pdf-lib on `NODE_PATH`
    PdfLibScript,
    /// `gs -q -dNOPAUSE -dBATCH -sDEVICE=pdfwrite -sOutputFile=<output> <inputs...>`
    Ghostscript,
    /// `pdfunite <inputs...> <output>`
    Pdfunite,
}

impl MergeStrategy {
    pub const ORDER: [Self; 3] = [Self::PdfLibScript, Self::Ghostscript, Self::Pdfunite];

    pub const fn name(self) -> &'static str {
        match self {
            Self::PdfLibScript => "node",
            Self::Ghostscript => "gs",
            Self::Pdfunite => "pdfunite",
        }
    }

    const fn tool(self) -> ToolSpec {
        match self {
            Self::PdfLibScript => ToolSpec {
                label: "node",
                env_var: NODE_BINARY_ENV,
                candidates: &["node", "nodejs"],
            },
            Self::Ghostscript => ToolSpec {
                label: "ghostscript",
                env_var: GHOSTSCRIPT_BINARY_ENV,
                candidates: &["gs", "gswin64c"],
            },
            Self::Pdfunite => ToolSpec {
                label: "pdfunite",
                env_var: PDFUNITE_BINARY_ENV,
                candidates: &["pdfunite"],
            },
        }
    }

    /// Resolve this strategy's binary against config, environment and `PATH`.
    pub fn resolve(self, config: &MergeConfig) -> Result<PathBuf, String> {
        let configured = match self {
            Self::PdfLibScript => config.node_binary.as_deref(),
            Self::Ghostscript => config.ghostscript_binary.as_deref(),
            Self::Pdfunite => config.pdfunite_binary.as_deref(),
        };
        resolve_binary(&self.tool(), configured)
    }

    /// Build the invocation merging `inputs` into `output`.
    pub(crate) fn command(
        self,
        binary: &Path,
        config: &MergeConfig,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<Command, String> {
        let mut command = Command::new(binary);
        match self {
            Self::PdfLibScript => {
                let script = std::path::absolute(&config.script_path)
                    .map_err(|e| format!("failed to resolve merge script path: {e}"))?;
                if !script.is_file() {
                    return Err(format!("merge script not found at {}", script.display()));
                }
                let library_dir = library_dir(config, &script);
                if !library_dir.is_dir() {
                    return Err(format!(
                        "pdf-lib dependency not found at {}",
                        library_dir.display()
                    ));
                }
                command
                    .arg(script)
                    .arg(output)
                    .args(inputs)
                    .env(LIBRARY_DIR_ENV, library_dir);
            }
            Self::Ghostscript => {
                let mut output_arg = std::ffi::OsString::from("-sOutputFile=");
                output_arg.push(output);
                command
                    .args(["-q", "-dNOPAUSE", "-dBATCH", "-sDEVICE=pdfwrite"])
                    .arg(output_arg)
                    .args(inputs);
            }
            Self::Pdfunite => {
                command.args(inputs).arg(output);
            }
        }
        Ok(command)
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Config `library_dir`, else `$NODE_PATH`, else `node_modules` beside the script's directory.
fn library_dir(config: &MergeConfig, script: &Path) -> PathBuf {
    if let Some(dir) = &config.library_dir {
        return dir.clone();
    }
    if let Some(dir) = std::env::var_os(LIBRARY_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    script
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."))
        .join("node_modules")
}

/// Why one strategy did not produce a merged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: MergeStrategy,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.strategy, self.reason)
    }
}

/// Failures of every attempted strategy, in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeFailures(Vec<StrategyFailure>);

impl MergeFailures {
    pub fn push(&mut self, strategy: MergeStrategy, reason: impl Into<String>) {
        self.0.push(StrategyFailure {
            strategy,
            reason: reason.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyFailure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MergeFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no pdf files provided for merging");
        }
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_render_in_attempt_order() {
        let mut failures = MergeFailures::default();
        failures.push(MergeStrategy::PdfLibScript, "node binary not found");
        failures.push(MergeStrategy::Ghostscript, "Unrecoverable error");
        failures.push(MergeStrategy::Pdfunite, "Syntax Error");

        assert_eq!(
            failures.to_string(),
            "node (node binary not found); gs (Unrecoverable error); pdfunite (Syntax Error)"
        );
    }

    #[test]
    fn test_ghostscript_arguments() {
        let config = MergeConfig::default();
        let inputs = vec![PathBuf::from("/s/base.pdf"), PathBuf::from("/s/attachment-1.pdf")];
        let command = MergeStrategy::Ghostscript
            .command(Path::new("gs"), &config, &inputs, Path::new("/s/merged.pdf"))
            .unwrap();
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-q",
                "-dNOPAUSE",
                "-dBATCH",
                "-sDEVICE=pdfwrite",
                "-sOutputFile=/s/merged.pdf",
                "/s/base.pdf",
                "/s/attachment-1.pdf"
            ]
        );
    }

    #[test]
    fn test_pdfunite_takes_output_last() {
        let config = MergeConfig::default();
        let inputs = vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")];
        let command = MergeStrategy::Pdfunite
            .command(Path::new("pdfunite"), &config, &inputs, Path::new("out.pdf"))
            .unwrap();
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, ["a.pdf", "b.pdf", "out.pdf"]);
    }

    #[test]
    fn test_script_strategy_requires_script_and_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("scripts").join("merge_pdf.js");
        let mut config = MergeConfig {
            script_path: script.clone(),
            ..MergeConfig::default()
        };

        let err = MergeStrategy::PdfLibScript
            .command(Path::new("node"), &config, &[], Path::new("out.pdf"))
            .unwrap_err();
        assert!(err.starts_with("merge script not found"), "{err}");

        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, b"// merge").unwrap();
        config.library_dir = Some(dir.path().join("missing_modules"));
        let err = MergeStrategy::PdfLibScript
            .command(Path::new("node"), &config, &[], Path::new("out.pdf"))
            .unwrap_err();
        assert!(err.starts_with("pdf-lib dependency not found"), "{err}");

        let modules = dir.path().join("node_modules");
        std::fs::create_dir_all(&modules).unwrap();
        config.library_dir = Some(modules.clone());
        let command = MergeStrategy::PdfLibScript
            .command(Path::new("node"), &config, &[PathBuf::from("a.pdf")], Path::new("out.pdf"))
            .unwrap();
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert!(envs.contains(&(std::ffi::OsStr::new("NODE_PATH"), Some(modules.as_os_str()))));
    }
}
