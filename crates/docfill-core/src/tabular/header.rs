use std::collections::HashMap;

use super::TabularRow;

/// Column lookup built from a header row.
///
/// Header cells are normalized (trimmed, lowercased); blank headers are
/// skipped and a repeated header maps to its last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    columns: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn from_row(row: &[String]) -> Self {
        let columns = row
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| {
                let key = normalize(cell);
                (!key.is_empty()).then_some((key, idx))
            })
            .collect();
        Self { columns }
    }

    /// Zero-based position of a column, matched case-insensitively
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.get(&normalize(column)).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    /// Required columns absent from the header, in the order given
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|column| !self.contains(column))
            .map(str::to_string)
            .collect()
    }

    /// Map a data row to `column → value`. Columns past the row's end are omitted.
    pub fn record(&self, row: &[String]) -> HashMap<String, String> {
        self.columns
            .iter()
            .filter_map(|(column, &idx)| row.get(idx).map(|value| (column.clone(), value.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn normalize(cell: &str) -> String {
    cell.trim().to_lowercase()
}

/// Rows of a worksheet, first row treated as the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularSheet {
    rows: Vec<TabularRow>,
}

impl TabularSheet {
    pub const fn new(rows: Vec<TabularRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[TabularRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TabularRow> {
        self.rows
    }

    pub fn header(&self) -> Option<&TabularRow> {
        self.rows.first()
    }

    pub fn header_index(&self) -> HeaderIndex {
        self.header()
            .map(|row| HeaderIndex::from_row(row))
            .unwrap_or_default()
    }

    /// Rows after the header
    pub fn data_rows(&self) -> &[TabularRow] {
        self.rows.get(1..).unwrap_or(&[])
    }

    /// Data rows keyed by normalized header name
    pub fn records(&self) -> Vec<HashMap<String, String>> {
        let index = self.header_index();
        self.data_rows().iter().map(|row| index.record(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> TabularRow {
        cells.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_header_normalization() {
        let index = HeaderIndex::from_row(&row(&[" User_Fname ", "", "EMAIL", "email"]));
        assert_eq!(index.position("user_fname"), Some(0));
        assert_eq!(index.position("Email"), Some(3));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_missing_columns_keep_caller_order() {
        let index = HeaderIndex::from_row(&row(&["email", "role_id"]));
        let missing = index.missing(["user_fname", "email", "position_id"]);
        assert_eq!(missing, vec!["user_fname", "position_id"]);
    }

    #[test]
    fn test_record_omits_columns_past_row_end() {
        let sheet = TabularSheet::new(vec![
            row(&["email", "tel", "room"]),
            row(&["a@example.com", "1234"]),
        ]);

        let records = sheet.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("email").map(String::as_str), Some("a@example.com"));
        assert_eq!(records[0].get("tel").map(String::as_str), Some("1234"));
        assert!(!records[0].contains_key("room"));
    }

    #[test]
    fn test_empty_sheet() {
        let sheet = TabularSheet::default();
        assert!(sheet.header_index().is_empty());
        assert!(sheet.data_rows().is_empty());
    }
}
