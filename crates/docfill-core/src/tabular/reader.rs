use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Error, Result};

use super::TabularRow;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const FIRST_SHEET_PART: &str = "xl/worksheets/sheet1.xml";
const WORKSHEET_DIR: &str = "xl/worksheets/";

/// Read every row of the first worksheet of an `.xlsx` file.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<TabularRow>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ContainerNotFound(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;
    debug!("Reading spreadsheet {}", path.display());
    read_rows_from(file)
}

/// Read every row of the first worksheet from in-memory `.xlsx` bytes.
pub fn read_rows_from_bytes(bytes: &[u8]) -> Result<Vec<TabularRow>> {
    read_rows_from(Cursor::new(bytes))
}

fn read_rows_from<R: Read + Seek>(source: R) -> Result<Vec<TabularRow>> {
    let mut archive =
        ZipArchive::new(source).map_err(|e| Error::MalformedContainer(e.to_string()))?;

    let sheet_part = locate_first_worksheet(&mut archive).ok_or(Error::WorksheetMissing)?;
    let sheet_xml = read_entry(&mut archive, &sheet_part)?.ok_or(Error::WorksheetMissing)?;

    let shared = match read_entry(&mut archive, SHARED_STRINGS_PART)? {
        Some(bytes) => parse_shared_strings(&bytes).unwrap_or_else(|reason| {
            warn!("Ignoring malformed shared string table: {}", reason);
            Vec::new()
        }),
        None => Vec::new(),
    };

    let rows = parse_worksheet(&sheet_xml, &shared)?;
    debug!(
        "Read {} rows from {} ({} shared strings)",
        rows.len(),
        sheet_part,
        shared.len()
    );
    Ok(rows)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| Error::MalformedContainer(format!("{name}: {e}")))?;
            Ok(Some(bytes))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(Error::MalformedContainer(format!("{name}: {e}"))),
    }
}

/// Find the part holding the first worksheet.
///
/// Follows the workbook's first `<sheet>` through its relationship, then
/// falls back to `sheet1.xml`, then to the lowest-numbered worksheet part.
fn locate_first_worksheet<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Option<String> {
    if let Some(part) = worksheet_from_workbook(archive)
        && archive.index_for_name(&part).is_some()
    {
        return Some(part);
    }

    if archive.index_for_name(FIRST_SHEET_PART).is_some() {
        return Some(FIRST_SHEET_PART.to_string());
    }

    archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix(WORKSHEET_DIR)?
                .strip_prefix("sheet")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .min()
        .map(|(_, name)| name)
}

fn worksheet_from_workbook<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Option<String> {
    let workbook = read_entry(archive, WORKBOOK_PART).ok()??;
    let rels = read_entry(archive, WORKBOOK_RELS_PART).ok()??;

    let rel_id = first_sheet_relationship(&workbook)?;
    let target = relationship_target(&rels, &rel_id)?;

    Some(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    })
}

fn first_sheet_relationship(workbook: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(workbook);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                return e.attributes().flatten().find_map(|attr| {
                    let key = attr.key.as_ref();
                    (key == b"r:id" || key.ends_with(b":id"))
                        .then(|| attr.unescape_value().ok().map(|v| v.into_owned()))
                        .flatten()
                });
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn relationship_target(rels: &[u8], id: &str) -> Option<String> {
    let mut reader = Reader::from_reader(rels);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attribute(&e, b"Id").as_deref() == Some(id) {
                    return attribute(&e, b"Target");
                }
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parse `xl/sharedStrings.xml` into an index-addressable list.
///
/// Rich-text items contribute the concatenation of their `<t>` fragments;
/// phonetic runs are skipped.
pub(crate) fn parse_shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" => in_text = current.is_some() && phonetic_depth == 0,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => {
                if let Some(item) = current.as_mut() {
                    item.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(t) if in_text => {
                if let Some(item) = current.as_mut() {
                    item.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(item) = current.take() {
                        strings.push(item);
                    }
                }
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// How a cell's raw value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

impl CellKind {
    fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("s") => Self::Shared,
            Some("inlineStr") => Self::Inline,
            _ => Self::Literal,
        }
    }
}

/// Cell being collected between `<c>` and `</c>`.
#[derive(Debug)]
struct PendingCell {
    column: usize,
    kind: CellKind,
    value: String,
    inline: String,
}

/// Where text events inside a cell are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellText {
    None,
    Value,
    Inline,
}

/// Row under construction.
#[derive(Debug, Default)]
struct RowBuffer {
    cells: Vec<String>,
    last_column: usize,
    max_column: usize,
}

impl RowBuffer {
    fn place(&mut self, column: usize, value: String) {
        while self.cells.len() < column - 1 {
            self.cells.push(String::new());
        }
        if self.cells.len() < column {
            self.cells.push(value);
        } else {
            self.cells[column - 1] = value;
        }
        self.last_column = column;
        self.max_column = self.max_column.max(column);
    }

    fn finish(mut self) -> TabularRow {
        while self.cells.len() < self.max_column {
            self.cells.push(String::new());
        }
        self.cells
    }
}

/// Stream-parse worksheet XML into rows.
pub(crate) fn parse_worksheet(xml: &[u8], shared: &[String]) -> Result<Vec<TabularRow>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut rows = Vec::new();
    let mut row: Option<RowBuffer> = None;
    let mut cell: Option<PendingCell> = None;
    let mut text_target = CellText::None;
    let mut phonetic_depth = 0usize;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::MalformedContainer(format!("worksheet: {e}")))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Some(RowBuffer::default()),
                b"c" => cell = Some(start_cell(&e, row.as_ref())?),
                b"v" if cell.is_some() => text_target = CellText::Value,
                b"rPh" => phonetic_depth += 1,
                b"t" if cell.as_ref().is_some_and(|c| c.kind == CellKind::Inline)
                    && phonetic_depth == 0 =>
                {
                    text_target = CellText::Inline;
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => rows.push(TabularRow::new()),
                b"c" => {
                    let pending = start_cell(&e, row.as_ref())?;
                    if let Some(row) = row.as_mut() {
                        row.place(pending.column, String::new());
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(pending) = cell.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::MalformedContainer(format!("worksheet: {e}")))?;
                    match text_target {
                        CellText::Value => pending.value.push_str(&text),
                        CellText::Inline => pending.inline.push_str(&text),
                        CellText::None => {}
                    }
                }
            }
            Event::CData(t) => {
                if let Some(pending) = cell.as_mut() {
                    let text = String::from_utf8_lossy(&t);
                    match text_target {
                        CellText::Value => pending.value.push_str(&text),
                        CellText::Inline => pending.inline.push_str(&text),
                        CellText::None => {}
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => text_target = CellText::None,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"c" => {
                    if let Some(pending) = cell.take() {
                        let column = pending.column;
                        let value = resolve_cell(pending, shared);
                        if let Some(row) = row.as_mut() {
                            row.place(column, value);
                        }
                    }
                    text_target = CellText::None;
                }
                b"row" => {
                    if let Some(finished) = row.take() {
                        rows.push(finished.finish());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

fn start_cell(e: &BytesStart<'_>, row: Option<&RowBuffer>) -> Result<PendingCell> {
    let previous = row.map_or(0, |r| r.last_column);
    let referenced = match attribute(e, b"r") {
        Some(reference) => column_index(&reference)?,
        None => 0,
    };
    let column = if referenced > 0 { referenced } else { previous + 1 };
    if column > MAX_COLUMNS {
        return Err(Error::MalformedContainer(format!(
            "worksheet: cell column {column} exceeds the {MAX_COLUMNS} column limit"
        )));
    }

    Ok(PendingCell {
        column,
        kind: CellKind::from_attr(attribute(e, b"t").as_deref()),
        value: String::new(),
        inline: String::new(),
    })
}

fn resolve_cell(cell: PendingCell, shared: &[String]) -> String {
    match cell.kind {
        CellKind::Shared => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|idx| shared.get(idx).cloned())
            .unwrap_or(cell.value),
        CellKind::Inline => cell.inline,
        CellKind::Literal => cell.value,
    }
}

/// Highest column a worksheet may address (`XFD`).
pub const MAX_COLUMNS: usize = 16_384;

/// Decode the column of a cell reference: `"A1"` → 1, `"AA1"` → 27.
///
/// Only ASCII letters are considered; a reference without letters yields 0.
/// Columns beyond [`MAX_COLUMNS`] are rejected as malformed.
pub fn column_index(cell_ref: &str) -> Result<usize> {
    let out_of_range =
        || Error::MalformedContainer(format!("cell reference {cell_ref} is out of range"));
    cell_ref
        .bytes()
        .filter(u8::is_ascii_alphabetic)
        .try_fold(0usize, |col, b| {
            col.checked_mul(26)
                .and_then(|col| col.checked_add(usize::from(b.to_ascii_uppercase() - b'A') + 1))
                .filter(|&col| col <= MAX_COLUMNS)
                .ok_or_else(out_of_range)
        })
}
