//! DOCX template filling.
//!
//! A `.docx` is a zip package; placeholders live in `word/document.xml` and
//! the header/footer parts. Word frequently splits a typed `{tag}` over
//! several runs, so tags are first re-joined, then loops spanning the cells
//! of one table row are widened to repeat the whole row, then the part is
//! rendered with XML escaping.

use serde_json::Value;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::placeholder::{next_tag, parse, render_str, xml_escape};
use super::DocumentError;
use crate::config::CONFIG;

const MAIN_PART: &str = "word/document.xml";
const ROW_OPEN: [&str; 2] = ["<w:tr>", "<w:tr "];
const ROW_CLOSE: &str = "</w:tr>";

fn is_template_part(name: &str) -> bool {
    name == MAIN_PART
        || ((name.starts_with("word/header") || name.starts_with("word/footer")) && name.ends_with(".xml"))
}

/// Reads one part, charging it against what is left of the unpacked-size
/// budget. Declared entry sizes are not trusted.
fn read_limited(entry: &mut impl Read, name: &str, budget: &mut u64) -> Result<Vec<u8>, DocumentError> {
    let mut bytes = Vec::new();
    entry.take(*budget + 1).read_to_end(&mut bytes)?;
    let read = bytes.len() as u64;
    if read > *budget {
        return Err(DocumentError::InvalidPackage(format!("Package is too large when unpacked (at {})", name)));
    }
    *budget -= read;
    Ok(bytes)
}

/// Fills every placeholder-bearing part of `template` with `data`
pub fn fill_docx(template: &[u8], data: &Value) -> Result<Vec<u8>, DocumentError> {
    fill_docx_within(template, data, CONFIG.documents.max_unpacked_bytes as u64)
}

fn fill_docx_within(template: &[u8], data: &Value, mut budget: u64) -> Result<Vec<u8>, DocumentError> {
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    if archive.by_name(MAIN_PART).is_err() {
        return Err(DocumentError::InvalidPackage(format!("{} is missing", MAIN_PART)));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }

        let mut bytes = read_limited(&mut entry, &name, &mut budget)?;

        if is_template_part(&name) {
            let xml = String::from_utf8(bytes)
                .map_err(|_| DocumentError::InvalidPackage(format!("{} is not UTF-8", name)))?;
            let prepared = expand_row_loops(&merge_split_tags(&xml));
            bytes = render_str(&prepared, data, &xml_escape)?.into_bytes();
            tracing::debug!("Filled template part {}", name);
        }

        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Checks an uploaded template: a DOCX package whose placeholder tags balance
pub fn validate_template(template: &[u8]) -> Result<(), DocumentError> {
    validate_within(template, CONFIG.documents.max_unpacked_bytes as u64)
}

fn validate_within(template: &[u8], mut budget: u64) -> Result<(), DocumentError> {
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    if archive.by_name(MAIN_PART).is_err() {
        return Err(DocumentError::InvalidPackage(format!("{} is missing", MAIN_PART)));
    }
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            continue;
        }
        let bytes = read_limited(&mut entry, &name, &mut budget)?;
        if !is_template_part(&name) {
            continue;
        }
        let xml = String::from_utf8(bytes)
            .map_err(|_| DocumentError::InvalidPackage(format!("{} is not UTF-8", name)))?;
        parse(&expand_row_loops(&merge_split_tags(&xml)))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Segment {
    Markup(String),
    Text(String),
}

fn segments(xml: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut rest = xml;
    while !rest.is_empty() {
        if rest.starts_with('<') {
            let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
            out.push(Segment::Markup(rest[..end].to_string()));
            rest = &rest[end..];
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            out.push(Segment::Text(rest[..end].to_string()));
            rest = &rest[end..];
        }
    }
    out
}

/// True when the text ends inside an unterminated `{...`
fn ends_inside_tag(text: &str) -> bool {
    let mut inside = false;
    for c in text.chars() {
        match c {
            '{' => inside = true,
            '}' => inside = false,
            _ => {}
        }
    }
    inside
}

fn is_paragraph_boundary(markup: &str) -> bool {
    markup.starts_with("</w:p>") || markup.starts_with("<w:p>") || markup.starts_with("<w:p ")
}

/// Joins `{tag}` text that Word split across runs. The markup between the
/// two halves is dropped; it always closes and reopens the same run so the
/// document stays well-formed. Tags never merge across paragraphs.
pub fn merge_split_tags(xml: &str) -> String {
    let segs = segments(xml);
    let mut out = String::with_capacity(xml.len());
    let mut i = 0;

    while i < segs.len() {
        match &segs[i] {
            Segment::Text(text) if ends_inside_tag(text) => {
                let mut merged = text.clone();
                let mut closed_at = None;
                for (j, seg) in segs.iter().enumerate().skip(i + 1) {
                    match seg {
                        Segment::Markup(m) if is_paragraph_boundary(m) => break,
                        Segment::Markup(_) => {}
                        Segment::Text(t) => {
                            merged.push_str(t);
                            if !ends_inside_tag(&merged) {
                                closed_at = Some(j);
                                break;
                            }
                        }
                    }
                }
                match closed_at {
                    Some(j) => {
                        out.push_str(&merged);
                        i = j + 1;
                    }
                    None => {
                        out.push_str(text);
                        i += 1;
                    }
                }
            }
            Segment::Text(text) | Segment::Markup(text) => {
                out.push_str(text);
                i += 1;
            }
        }
    }
    out
}

fn find_row_start(xml: &str, pos: usize) -> Option<usize> {
    let before = &xml[..pos];
    let start = ROW_OPEN.iter().filter_map(|open| before.rfind(open)).max()?;
    if before[start..].contains(ROW_CLOSE) {
        return None;
    }
    Some(start)
}

/// Position of the `{/name}` matching an opening tag that ended at `from`
fn find_close(xml: &str, from: usize, limit: usize, name: &str) -> Option<(usize, usize)> {
    let mut depth = 0;
    let mut pos = from;
    while let Some(tag) = next_tag(xml, pos) {
        if tag.end > limit {
            return None;
        }
        if tag.name == name {
            if tag.is_open() {
                depth += 1;
            } else if tag.is_close() {
                if depth == 0 {
                    return Some((tag.start, tag.end));
                }
                depth -= 1;
            }
        }
        pos = tag.end;
    }
    None
}

/// Moves `{#items}` / `{/items}` that open and close in different cells of
/// the same table row to just outside that row, so the row repeats.
pub fn expand_row_loops(xml: &str) -> String {
    let mut xml = xml.to_string();
    let mut from = 0;

    while let Some(open) = next_tag(&xml, from) {
        let (start, end) = (open.start, open.end);
        if !open.is_open() {
            from = end;
            continue;
        }
        let name = open.name.to_string();

        let Some(row_start) = find_row_start(&xml, start) else {
            from = end;
            continue;
        };
        let Some(row_end) = xml[end..].find(ROW_CLOSE).map(|i| end + i + ROW_CLOSE.len()) else {
            from = end;
            continue;
        };
        let Some((close_start, close_end)) = find_close(&xml, end, row_end, &name) else {
            from = end;
            continue;
        };
        if !xml[end..close_start].contains("</w:tc>") {
            // inline loop inside one cell
            from = close_end;
            continue;
        }

        let rebuilt = [
            &xml[..row_start],
            &xml[start..end],
            &xml[row_start..start],
            &xml[end..close_start],
            &xml[close_end..row_end],
            &xml[close_start..close_end],
            &xml[row_end..],
        ]
        .concat();
        xml = rebuilt;
        // the widened loop now ends exactly where the row ended
        from = row_end;
    }
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn package(document_xml: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.start_file("word/footer1.xml", options).unwrap();
        writer.write_all(b"<w:ftr><w:t>{number}</w:t></w:ftr>").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn read_part(docx: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn split_runs_are_merged() {
        let xml = r#"<w:p><w:r><w:t>Nr {num</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>ber}!</w:t></w:r></w:p>"#;
        assert_eq!(merge_split_tags(xml), r#"<w:p><w:r><w:t>Nr {number}!</w:t></w:r></w:p>"#);
    }

    #[test]
    fn unterminated_braces_do_not_cross_paragraphs() {
        let xml = "<w:p><w:r><w:t>a {b</w:t></w:r></w:p><w:p><w:r><w:t>c}</w:t></w:r></w:p>";
        assert_eq!(merge_split_tags(xml), xml);
    }

    #[test]
    fn row_loops_repeat_whole_rows() {
        let xml = "<w:tbl><w:tr><w:tc><w:t>{#items}{description}</w:t></w:tc><w:tc><w:t>{quantity}{/items}</w:t></w:tc></w:tr></w:tbl>";
        let expanded = expand_row_loops(xml);
        assert_eq!(
            expanded,
            "<w:tbl>{#items}<w:tr><w:tc><w:t>{description}</w:t></w:tc><w:tc><w:t>{quantity}</w:t></w:tc></w:tr>{/items}</w:tbl>"
        );
    }

    #[test]
    fn inline_loops_stay_in_their_cell() {
        let xml = "<w:tr><w:tc><w:t>{#tags}{.} {/tags}</w:t></w:tc></w:tr>";
        assert_eq!(expand_row_loops(xml), xml);
    }

    #[test]
    fn fills_document_and_footer() {
        let document = concat!(
            "<w:document><w:p><w:r><w:t>{client_</w:t></w:r><w:r><w:t>name}</w:t></w:r></w:p>",
            "<w:tbl><w:tr><w:tc><w:t>{#items}{index}</w:t></w:tc><w:tc><w:t>{description}{/items}</w:t></w:tc></w:tr></w:tbl>",
            "</w:document>"
        );
        let data = json!({
            "number": "PROT/2024/0001",
            "client_name": "Kowalski & Syn",
            "items": [{ "index": 1, "description": "Kocioł" }, { "index": 2, "description": "Zawór" }]
        });
        let filled = fill_docx(&package(document), &data).unwrap();

        let body = read_part(&filled, "word/document.xml");
        assert!(body.contains("<w:t>Kowalski &amp; Syn</w:t>"), "{}", body);
        assert_eq!(body.matches("<w:tr>").count(), 2);
        assert!(body.contains("Kocioł") && body.contains("Zawór"));
        assert_eq!(read_part(&filled, "word/footer1.xml"), "<w:ftr><w:t>PROT/2024/0001</w:t></w:ftr>");
        assert_eq!(read_part(&filled, "[Content_Types].xml"), "<Types/>");
    }

    #[test]
    fn rejects_non_docx_input() {
        assert!(matches!(fill_docx(b"not a zip", &json!({})), Err(DocumentError::InvalidPackage(_))));

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("readme.txt", FileOptions::default()).unwrap();
        writer.write_all(b"hi").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(fill_docx(&bytes, &json!({})), Err(DocumentError::InvalidPackage(_))));
    }

    #[test]
    fn unbalanced_template_is_reported() {
        let result = fill_docx(&package("<w:t>{#items}</w:t>"), &json!({}));
        assert!(matches!(result, Err(DocumentError::Template(_))));
    }

    #[test]
    fn validate_template_checks_package_and_tags() {
        assert!(validate_template(&package("<w:p><w:r><w:t>{number}</w:t></w:r></w:p>")).is_ok());
        assert!(matches!(
            validate_template(&package("<w:t>{#items}{description}</w:t>")),
            Err(DocumentError::Template(_))
        ));
        assert!(matches!(validate_template(b"PK but not really"), Err(DocumentError::InvalidPackage(_))));
    }

    #[test]
    fn unpacked_size_is_capped() {
        // 1 MiB of zeros deflates to a few kilobytes
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(MAIN_PART, options).unwrap();
        writer.write_all(b"<w:document/>").unwrap();
        writer.start_file("word/media/blank.bin", options).unwrap();
        writer.write_all(&vec![0u8; 1024 * 1024]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(bytes.len() < 64 * 1024);

        assert!(matches!(validate_within(&bytes, 512 * 1024), Err(DocumentError::InvalidPackage(_))));
        assert!(matches!(fill_docx_within(&bytes, &json!({}), 512 * 1024), Err(DocumentError::InvalidPackage(_))));
        assert!(validate_within(&bytes, 2 * 1024 * 1024).is_ok());
    }

    #[test]
    fn budget_is_shared_across_parts() {
        let mut budget = 10;
        assert_eq!(read_limited(&mut &b"123456"[..], "a", &mut budget).unwrap(), b"123456");
        assert_eq!(budget, 4);
        assert!(read_limited(&mut &b"12345"[..], "b", &mut budget).is_err());
    }
}
