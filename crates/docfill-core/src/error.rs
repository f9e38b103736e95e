use std::path::Path;

use thiserror::Error;

use crate::merge::MergeFailures;
use crate::util::redact_path;

/// Unified error type for docfill-core
///
/// This enum encompasses all error cases that can occur in the library:
/// - Spreadsheet ingestion (missing container, missing worksheet, bad zip)
/// - Template filling (missing template, unparseable body parts, re-packaging)
/// - Conversion through the headless office subprocess
/// - Attachment validation and the merge strategy cascade
/// - Configuration loading and general I/O
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Spreadsheet Errors
    // ==========================================================================
    /// The spreadsheet container does not exist
    #[error("spreadsheet not found: {0}")]
    ContainerNotFound(String),

    /// The container has no worksheet part
    #[error("workbook has no worksheet")]
    WorksheetMissing,

    /// The container is not a readable zip package, or its worksheet XML is broken
    #[error("malformed spreadsheet container: {0}")]
    MalformedContainer(String),

    // ==========================================================================
    // Template Errors
    // ==========================================================================
    /// The template file does not exist
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A transformable XML part could not be tokenized.
    ///
    /// Only the strict rewriter returns this; `fill_template` recovers by
    /// emitting the part's original bytes.
    #[error("XML part {part} is unparseable: {reason}")]
    XmlPartUnparseable { part: String, reason: String },

    /// Reading or re-emitting the template zip package failed
    #[error("failed to process template package: {0}")]
    TemplatePackage(String),

    // ==========================================================================
    // Conversion Errors
    // ==========================================================================
    /// The headless converter failed or did not produce the expected PDF
    #[error("document conversion failed: {reason}{}{}", captured("stdout", stdout), captured("stderr", stderr))]
    ConversionFailed {
        reason: String,
        stdout: String,
        stderr: String,
    },

    // ==========================================================================
    // Merge Errors
    // ==========================================================================
    /// A non-empty attachment does not start with the PDF signature
    #[error("attachment {0} is not a PDF file")]
    InvalidAttachment(String),

    /// Every merge strategy failed
    #[error("failed to merge pdf files: {0}")]
    MergeStrategyExhausted(MergeFailures),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Replace `dir` with the scratch marker in conversion diagnostics.
    pub(crate) fn redact_scratch(self, dir: &Path) -> Self {
        match self {
            Self::ConversionFailed {
                reason,
                stdout,
                stderr,
            } => Self::ConversionFailed {
                reason: redact_path(&reason, dir),
                stdout: redact_path(&stdout, dir),
                stderr: redact_path(&stderr, dir),
            },
            other => other,
        }
    }
}

fn captured(label: &str, text: &str) -> String {
    if text.is_empty() {
        String::new()
    } else {
        format!("; {label}: {text}")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_failed_display_includes_captured_output() {
        let err = Error::ConversionFailed {
            reason: "pdf not created".to_string(),
            stdout: "convert /tmp/x.docx".to_string(),
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "document conversion failed: pdf not created; stdout: convert /tmp/x.docx"
        );
    }

    #[test]
    fn test_redact_scratch_covers_reason_and_output() {
        let err = Error::ConversionFailed {
            reason: "converted file /tmp/docfill-render-x/filled.pdf was not created".to_string(),
            stdout: "convert /tmp/docfill-render-x/filled.docx".to_string(),
            stderr: "warn: /tmp/docfill-render-x".to_string(),
        }
        .redact_scratch(Path::new("/tmp/docfill-render-x"));
        assert_eq!(
            err.to_string(),
            "document conversion failed: converted file <scratch>/filled.pdf was not created; \
             stdout: convert <scratch>/filled.docx; stderr: warn: <scratch>"
        );

        let untouched = Error::InvalidAttachment("/tmp/docfill-render-x/a.pdf".to_string())
            .redact_scratch(Path::new("/tmp/docfill-render-x"));
        assert!(untouched.to_string().contains("/tmp/docfill-render-x"));
    }

    #[test]
    fn test_invalid_attachment_names_file() {
        let err = Error::InvalidAttachment("scan.png".to_string());
        assert_eq!(err.to_string(), "attachment scan.png is not a PDF file");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
