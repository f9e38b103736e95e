//! PDF concatenation through a cascade of external tools.
//!
//! Each call materializes its inputs in a private scratch directory and tries
//! [`MergeStrategy::ORDER`] until one tool produces a valid PDF. The scratch
//! directory is removed when the call returns, whatever the outcome.

mod strategy;

pub use strategy::{MergeFailures, MergeStrategy, StrategyFailure};

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::{Error, Result};
use crate::process::{deadline, run_bounded};
use crate::util;

/// PDF file signature
pub const PDF_MAGIC: &[u8] = b"%PDF";

/// Check whether bytes start with the PDF signature.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// A document appended after the base PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read an attachment from disk, named after its file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self { name, bytes })
    }

    /// Empty or whitespace-only content; such attachments are skipped.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }
}

/// Runs the merge cascade.
#[derive(Debug, Clone, Default)]
pub struct PdfMerger {
    config: MergeConfig,
    scratch_parent: Option<PathBuf>,
}

impl PdfMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            scratch_parent: None,
        }
    }

    /// Create scratch directories under `parent` instead of the system temp dir.
    pub fn with_scratch_parent(mut self, parent: Option<PathBuf>) -> Self {
        self.scratch_parent = parent;
        self
    }

    /// Append `attachments` to `base` in order.
    ///
    /// Blank attachments are skipped. With nothing left to append the base
    /// bytes are returned as-is and no tool is run.
    pub async fn merge_attachments(
        &self,
        base: &[u8],
        attachments: &[Attachment],
    ) -> Result<Vec<u8>> {
        let mut usable = Vec::with_capacity(attachments.len());
        for (idx, attachment) in attachments.iter().enumerate() {
            if attachment.is_blank() {
                debug!("Skipping empty attachment {}", attachment.name);
                continue;
            }
            if !is_pdf(&attachment.bytes) {
                return Err(Error::InvalidAttachment(attachment.name.clone()));
            }
            usable.push((idx + 1, attachment));
        }

        if usable.is_empty() {
            return Ok(base.to_vec());
        }

        let scratch = util::scratch_dir(self.scratch_parent.as_deref(), "docfill-merge-")?;
        let base_path = scratch.path().join("base.pdf");
        tokio::fs::write(&base_path, base).await?;

        let mut inputs = vec![base_path];
        for (number, attachment) in usable {
            let path = scratch.path().join(format!("attachment-{number}.pdf"));
            tokio::fs::write(&path, &attachment.bytes).await?;
            inputs.push(path);
        }

        let output = scratch.path().join("merged.pdf");
        self.run_cascade(&inputs, &output, scratch.path()).await?;
        Ok(tokio::fs::read(&output).await?)
    }

    /// Merge existing PDF files into `output`.
    pub async fn merge_paths(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::MergeStrategyExhausted(MergeFailures::default()));
        }
        let inputs = inputs
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()?;
        let output = std::path::absolute(output)?;

        let scratch = util::scratch_dir(self.scratch_parent.as_deref(), "docfill-merge-")?;
        let staged = scratch.path().join("merged.pdf");
        self.run_cascade(&inputs, &staged, scratch.path()).await?;
        tokio::fs::copy(&staged, &output).await?;
        Ok(())
    }

    async fn run_cascade(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        scratch: &Path,
    ) -> Result<MergeStrategy> {
        let mut failures = MergeFailures::default();
        for strategy in MergeStrategy::ORDER {
            match self.attempt(strategy, inputs, output).await {
                Ok(()) => {
                    info!("Merged {} PDFs with {}", inputs.len(), strategy);
                    return Ok(strategy);
                }
                Err(reason) => {
                    let reason = util::redact_path(&reason, scratch);
                    warn!("Merge strategy {} failed: {}", strategy, reason);
                    failures.push(strategy, reason);
                }
            }
        }
        Err(Error::MergeStrategyExhausted(failures))
    }

    async fn attempt(
        &self,
        strategy: MergeStrategy,
        inputs: &[PathBuf],
        output: &Path,
    ) -> std::result::Result<(), String> {
        let binary = strategy.resolve(&self.config)?;
        let command = strategy.command(&binary, &self.config, inputs, output)?;

        match tokio::fs::remove_file(output).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("failed to clear previous output: {e}")),
        }

        let result = run_bounded(command, deadline(self.config.timeout_secs))
            .await
            .map_err(|e| e.to_string())?;
        if !result.success() {
            return Err(result.diagnostic());
        }

        let merged = tokio::fs::read(output)
            .await
            .map_err(|e| format!("exited successfully but produced no output: {e}"))?;
        if merged.is_empty() {
            return Err("exited successfully but produced an empty file".to_string());
        }
        if !is_pdf(&merged) {
            return Err("exited successfully but produced a file that is not a PDF".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable_config() -> MergeConfig {
        MergeConfig {
            node_binary: Some(PathBuf::from("/nonexistent/docfill/node")),
            ghostscript_binary: Some(PathBuf::from("/nonexistent/docfill/gs")),
            pdfunite_binary: Some(PathBuf::from("/nonexistent/docfill/pdfunite")),
            ..MergeConfig::default()
        }
    }

    #[test]
    fn test_blank_attachment() {
        assert!(Attachment::new("a.pdf", Vec::new()).is_blank());
        assert!(Attachment::new("a.pdf", b" \n\t".to_vec()).is_blank());
        assert!(!Attachment::new("a.pdf", b"%PDF-1.7".to_vec()).is_blank());
    }

    #[tokio::test]
    async fn test_no_attachments_returns_base_unchanged() {
        let merger = PdfMerger::new(unavailable_config());
        let base = b"%PDF-1.4 base".to_vec();
        assert_eq!(merger.merge_attachments(&base, &[]).await.unwrap(), base);
    }

    #[tokio::test]
    async fn test_only_blank_attachments_returns_base_unchanged() {
        let merger = PdfMerger::new(unavailable_config());
        let base = b"%PDF-1.4 base".to_vec();
        let attachments = [Attachment::new("empty.pdf", b"   ".to_vec())];
        assert_eq!(merger.merge_attachments(&base, &attachments).await.unwrap(), base);
    }

    #[tokio::test]
    async fn test_non_pdf_attachment_fails_fast() {
        let merger = PdfMerger::new(unavailable_config());
        let attachments = [
            Attachment::new("ok.pdf", b"%PDF-1.4 ok".to_vec()),
            Attachment::new("scan.png", b"\x89PNG".to_vec()),
        ];
        let err = merger
            .merge_attachments(b"%PDF-1.4", &attachments)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttachment(ref name) if name == "scan.png"));
    }

    #[tokio::test]
    async fn test_all_strategies_unavailable() {
        let merger = PdfMerger::new(unavailable_config());
        let attachments = [Attachment::new("a.pdf", b"%PDF-1.4 a".to_vec())];
        let err = merger
            .merge_attachments(b"%PDF-1.4 base", &attachments)
            .await
            .unwrap_err();

        let Error::MergeStrategyExhausted(failures) = &err else {
            panic!("unexpected error: {err:?}");
        };
        let names: Vec<_> = failures.iter().map(|f| f.strategy).collect();
        assert_eq!(names, MergeStrategy::ORDER);
        let message = err.to_string();
        assert!(message.starts_with("failed to merge pdf files: node ("), "{message}");
        assert!(message.contains("; gs ("));
        assert!(message.contains("; pdfunite ("));
    }

    #[tokio::test]
    async fn test_merge_paths_without_inputs() {
        let merger = PdfMerger::new(unavailable_config());
        let err = merger.merge_paths(&[], Path::new("out.pdf")).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to merge pdf files: no pdf files provided for merging");
    }
}
