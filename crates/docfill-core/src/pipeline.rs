//! End-to-end document generation: fill, convert, merge.

use std::path::Path;

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::convert::DocumentConverter;
use crate::error::Result;
use crate::merge::{Attachment, PdfMerger};
use crate::template::{PlaceholderMap, fill_template_path};
use crate::util;

/// Scratch file name of the filled template.
const FILLED_DOCX: &str = "filled.docx";

/// Fills a DOCX template, converts it to PDF and appends attachments.
///
/// Every call works in its own scratch directory, removed when the call
/// returns. Calls share nothing but the placeholder pattern cache.
#[derive(Debug, Clone, Default)]
pub struct DocumentPipeline {
    config: AppConfig,
    converter: DocumentConverter,
    merger: PdfMerger,
}

impl DocumentPipeline {
    pub fn new(config: AppConfig) -> Self {
        let converter = DocumentConverter::new(config.converter.clone())
            .with_scratch_parent(config.scratch_dir.clone());
        let merger =
            PdfMerger::new(config.merge.clone()).with_scratch_parent(config.scratch_dir.clone());
        Self {
            config,
            converter,
            merger,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn converter(&self) -> &DocumentConverter {
        &self.converter
    }

    pub fn merger(&self) -> &PdfMerger {
        &self.merger
    }

    /// Fill `template` with `values` and return the converted PDF bytes.
    pub async fn render_pdf(
        &self,
        template: impl AsRef<Path>,
        values: &PlaceholderMap,
    ) -> Result<Vec<u8>> {
        self.render_pdf_with_attachments(template, values, &[]).await
    }

    /// Like [`render_pdf`](Self::render_pdf), then append `attachments` in order.
    pub async fn render_pdf_with_attachments(
        &self,
        template: impl AsRef<Path>,
        values: &PlaceholderMap,
        attachments: &[Attachment],
    ) -> Result<Vec<u8>> {
        let template = template.as_ref();
        let filled = fill_template_path(template, values)?;

        let scratch = util::scratch_dir(self.config.scratch_dir.as_deref(), "docfill-render-")?;
        let docx = scratch.path().join(FILLED_DOCX);
        tokio::fs::write(&docx, &filled).await?;
        debug!("Filled {} with {} values", template.display(), values.len());

        let pdf_path = self
            .converter
            .convert(&docx, scratch.path())
            .await
            .map_err(|e| e.redact_scratch(scratch.path()))?;
        let pdf = tokio::fs::read(&pdf_path).await?;

        let merged = self.merger.merge_attachments(&pdf, attachments).await?;
        info!(
            "Rendered {} ({} bytes, {} attachments)",
            template.display(),
            merged.len(),
            attachments.len()
        );
        Ok(merged)
    }
}
