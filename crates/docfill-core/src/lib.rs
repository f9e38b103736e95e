//! Docfill Core Library
//!
//! This library provides the core functionality for generating documents:
//! - Spreadsheet row ingestion from `.xlsx` packages
//! - `{{placeholder}}` filling of `.docx` templates, including split runs
//! - Headless office conversion to PDF
//! - PDF concatenation through a cascade of external tools

pub mod config;
pub mod convert;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod process;
pub mod tabular;
pub mod template;
pub mod util;

pub use config::{AppConfig, ConverterConfig, MergeConfig};
pub use convert::DocumentConverter;
pub use error::{Error, Result};
pub use merge::{Attachment, MergeFailures, MergeStrategy, PdfMerger, StrategyFailure};
pub use pipeline::DocumentPipeline;
pub use tabular::{HeaderIndex, TabularRow, TabularSheet, read_rows, read_sheet};
pub use template::{ContainerEntry, PlaceholderMap, fill_template, fill_template_file};
