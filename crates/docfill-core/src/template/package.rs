use std::io::{Cursor, Read, Seek, Write};

use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::placeholders::{PlaceholderMap, Placeholders};
use super::rewriter::{RewrittenPart, try_rewrite};
use crate::error::{Error, Result};

const BODY_PART: &str = "word/document.xml";
const NOTE_PARTS: &[&str] = &["word/footnotes.xml", "word/endnotes.xml"];
/// Header and footer parts, with or without a trailing number.
const HEADER_FOOTER_PREFIXES: &[&str] = &["word/header", "word/footer"];

/// One entry of a template package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    pub is_transformable: bool,
}

/// Whether a package entry holds document text subject to substitution.
pub fn is_transformable_part(name: &str) -> bool {
    if name == BODY_PART || NOTE_PARTS.contains(&name) {
        return true;
    }
    HEADER_FOOTER_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".xml"))
            .is_some_and(|number| number.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Decompress every entry of a template package, in package order.
pub fn read_entries(template: &[u8]) -> Result<Vec<ContainerEntry>> {
    let mut archive = open(template)?;
    (0..archive.len())
        .map(|idx| {
            let mut file = archive.by_index(idx).map_err(package_error)?;
            let name = file.name().to_string();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(ContainerEntry {
                is_transformable: is_transformable_part(&name),
                name,
                bytes,
            })
        })
        .collect()
}

/// Rewrite the transformable parts of a template package.
///
/// Entries left unchanged are copied without recompression. A part that
/// cannot be parsed is kept as-is and the rest of the package is still filled.
pub fn fill_template(template: &[u8], map: &PlaceholderMap) -> Result<Vec<u8>> {
    let placeholders = map.compile()?;
    let mut archive = open(template)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(template.len())));
    let mut replacements = 0;

    for idx in 0..archive.len() {
        if !map.is_empty()
            && let Some((name, method, part)) = rewrite_entry(&mut archive, idx, &placeholders)?
        {
            replacements += part.replacements;
            let options = SimpleFileOptions::default().compression_method(method);
            writer.start_file(name, options).map_err(package_error)?;
            writer.write_all(&part.bytes)?;
            continue;
        }

        let raw = archive.by_index_raw(idx).map_err(package_error)?;
        writer.raw_copy_file(raw).map_err(package_error)?;
    }

    let filled = writer.finish().map_err(package_error)?.into_inner();
    debug!(
        "Filled template: {} entries, {} placeholders replaced",
        archive.len(),
        replacements
    );
    Ok(filled)
}

/// Rewrite entry `idx` if it is transformable and substitution changed it.
fn rewrite_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    idx: usize,
    placeholders: &Placeholders<'_>,
) -> Result<Option<(String, CompressionMethod, RewrittenPart)>> {
    let mut file = archive.by_index(idx).map_err(package_error)?;
    let name = file.name().to_string();
    if !is_transformable_part(&name) {
        return Ok(None);
    }

    let method = match file.compression() {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    };
    let mut xml = Vec::new();
    file.read_to_end(&mut xml)?;
    if !xml.contains(&b'{') {
        return Ok(None);
    }

    match try_rewrite(&xml, placeholders) {
        Ok(part) if part.bytes != xml => Ok(Some((name, method, part))),
        Ok(_) => Ok(None),
        Err(reason) => {
            warn!("Keeping original bytes of {}: {}", name, reason);
            Ok(None)
        }
    }
}

/// Rewrite a single XML part, reporting parse failures.
pub fn rewrite_xml_part(part: &str, xml: &[u8], map: &PlaceholderMap) -> Result<Vec<u8>> {
    let placeholders = map.compile()?;
    try_rewrite(xml, &placeholders)
        .map(|rewritten| rewritten.bytes)
        .map_err(|reason| Error::XmlPartUnparseable {
            part: part.to_string(),
            reason,
        })
}

fn open(template: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(template)).map_err(package_error)
}

fn package_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(io) => Error::Io(io),
        other => Error::TemplatePackage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transformable_parts() {
        assert!(is_transformable_part("word/document.xml"));
        assert!(is_transformable_part("word/header1.xml"));
        assert!(is_transformable_part("word/footer12.xml"));
        assert!(is_transformable_part("word/header.xml"));
        assert!(!is_transformable_part("word/header1a.xml"));
        assert!(is_transformable_part("word/footnotes.xml"));
        assert!(!is_transformable_part("word/styles.xml"));
        assert!(!is_transformable_part("word/_rels/document.xml.rels"));
        assert!(!is_transformable_part("word/headerFooter.xml"));
        assert!(!is_transformable_part("[Content_Types].xml"));
    }

    #[test]
    fn test_not_a_zip() {
        let map: PlaceholderMap = [("name", "x")].into_iter().collect();
        let err = fill_template(b"not a zip", &map).unwrap_err();
        assert!(matches!(err, Error::TemplatePackage(_)), "{err:?}");
    }

    #[test]
    fn test_rewrite_xml_part_reports_part_name() {
        let map: PlaceholderMap = [("name", "x")].into_iter().collect();
        let err = rewrite_xml_part("word/document.xml", b"<w:p><w:t>{{name}}", &map).unwrap_err();
        match err {
            Error::XmlPartUnparseable { part, .. } => assert_eq!(part, "word/document.xml"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
