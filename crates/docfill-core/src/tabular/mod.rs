//! Spreadsheet ingestion.
//!
//! Reads the first worksheet of an `.xlsx` package into rows of strings.
//! Numeric, date and boolean cells are returned as their stored text.

mod header;
mod reader;

pub use header::{HeaderIndex, TabularSheet};
pub use reader::{MAX_COLUMNS, column_index, read_rows, read_rows_from_bytes};

use std::path::Path;

use crate::error::Result;

/// One worksheet row, one string per 1-based column (index 0 holds column 1)
pub type TabularRow = Vec<String>;

/// Read the first worksheet of an `.xlsx` file as a [`TabularSheet`].
pub fn read_sheet(path: impl AsRef<Path>) -> Result<TabularSheet> {
    read_rows(path).map(TabularSheet::new)
}
