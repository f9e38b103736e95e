//! DOCX template filling.
//!
//! Replaces `{{key}}` placeholders in the body, header, footer and note
//! parts of a WordprocessingML package, including placeholders that Word
//! has split over several runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use docfill_core::template::{PlaceholderMap, fill_template_file};
//!
//! let mut values = PlaceholderMap::new();
//! values.insert("total_amount", "1,000.00");
//! fill_template_file("reward.docx", "filled.docx", &values)?;
//! # Ok::<(), docfill_core::Error>(())
//! ```

mod package;
mod placeholders;
mod rewriter;

pub use package::{
    ContainerEntry, fill_template, is_transformable_part, read_entries, rewrite_xml_part,
};
pub use placeholders::{PlaceholderMap, cached_pattern_count};

use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};

/// Read a template from disk, fill it and return the package bytes.
pub fn fill_template_path(template: impl AsRef<Path>, map: &PlaceholderMap) -> Result<Vec<u8>> {
    let template = template.as_ref();
    let bytes = std::fs::read(template).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::TemplateNotFound(template.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;
    fill_template(&bytes, map)
}

/// Fill a template file and write the result to `output`.
pub fn fill_template_file(
    template: impl AsRef<Path>,
    output: impl AsRef<Path>,
    map: &PlaceholderMap,
) -> Result<()> {
    let filled = fill_template_path(template.as_ref(), map)?;
    std::fs::write(output.as_ref(), filled)?;
    info!(
        "Filled {} -> {}",
        template.as_ref().display(),
        output.as_ref().display()
    );
    Ok(())
}
