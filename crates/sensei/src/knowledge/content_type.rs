//! Content type detection and text extraction
//!
//! Detection combines signature sniffing with the file extension; unknown
//! binary data is rejected up front so a failed run records why. PDF
//! extraction reads plain-text show operators (Tj/TJ) from uncompressed
//! content streams, which covers study-material-grade documents; compressed
//! streams are reported as unsupported rather than silently skipped.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// Detected kind of an ingested source file
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentType {
    Pdf,
    Markdown,
    Html,
    Tabular,
    Text,
}

const BINARY_MAGICS: &[(&[u8], &str)] = &[
    (b"\x89PNG", "PNG image"),
    (b"\xFF\xD8\xFF", "JPEG image"),
    (b"GIF8", "GIF image"),
    (b"PK\x03\x04", "ZIP archive"),
    (b"\x1F\x8B", "gzip archive"),
    (b"\x7FELF", "ELF binary"),
];

/// Detect the content type of a source file.
///
/// The sniffed signature wins over the extension so a mislabeled binary is
/// caught before chunking.
pub fn detect(path: &Path, bytes: &[u8]) -> PipelineResult<ContentType> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(ContentType::Pdf);
    }
    for (magic, name) in BINARY_MAGICS {
        if bytes.starts_with(magic) {
            return Err(PipelineError::unsupported_content_type(format!(
                "{name} data cannot be processed as certification material"
            )));
        }
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let is_utf8 = std::str::from_utf8(bytes).is_ok();

    match extension.as_deref() {
        Some("pdf") => Ok(ContentType::Pdf),
        Some("md" | "markdown") if is_utf8 => Ok(ContentType::Markdown),
        Some("html" | "htm") if is_utf8 => Ok(ContentType::Html),
        Some("csv" | "tsv") if is_utf8 => Ok(ContentType::Tabular),
        Some(ext) if !is_utf8 => Err(PipelineError::unsupported_content_type(format!(
            ".{ext} file is not valid UTF-8 text"
        ))),
        None if !is_utf8 => Err(PipelineError::unsupported_content_type(
            "binary content with no recognized signature or extension",
        )),
        // Unknown extension but readable text still chunks fine
        _ => Ok(ContentType::Text),
    }
}

/// Extract plain text from raw bytes according to the detected type.
///
/// HTML is normalized to markdown so downstream structural chunking sees one
/// markup dialect. Fails with `UnsupportedContentType` when nothing textual
/// can be recovered.
pub fn extract_text(content_type: ContentType, bytes: &[u8]) -> PipelineResult<String> {
    let text = match content_type {
        ContentType::Pdf => extract_pdf_text(bytes)?,
        ContentType::Html => html2md::parse_html(&utf8(bytes)?),
        ContentType::Markdown | ContentType::Tabular | ContentType::Text => utf8(bytes)?,
    };
    if text.trim().is_empty() {
        return Err(PipelineError::unsupported_content_type(
            "source contains no text content",
        ));
    }
    Ok(text)
}

fn utf8(bytes: &[u8]) -> PipelineResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PipelineError::unsupported_content_type("content is not valid UTF-8"))
}

fn extract_pdf_text(bytes: &[u8]) -> PipelineResult<String> {
    // Latin-1 view of the raw bytes; text operators live in the clear in
    // uncompressed streams and multi-byte encodings are out of scope here.
    let raw: String = bytes.iter().map(|&b| b as char).collect();

    let mut blocks: Vec<String> = Vec::new();
    let mut rest = raw.as_str();
    while let Some(bt) = rest.find("BT") {
        let Some(after) = rest.get(bt + 2..) else {
            break;
        };
        let Some(et) = after.find("ET") else {
            break;
        };
        if let Some(block) = after.get(..et) {
            let text = extract_show_operators(block);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                blocks.push(trimmed.to_string());
            }
        }
        match after.get(et + 2..) {
            Some(tail) => rest = tail,
            None => break,
        }
    }

    let text = blocks.join("\n\n");
    if text.trim().is_empty() {
        if raw.contains("FlateDecode") {
            return Err(PipelineError::unsupported_content_type(
                "PDF uses compressed content streams; no plain-text operators found",
            ));
        }
        return Err(PipelineError::unsupported_content_type(
            "PDF contains no extractable text",
        ));
    }
    Ok(text)
}

/// Pull string literals out of one BT..ET block, approximating line moves
/// (Td/TD/T*) with newlines. TJ arrays concatenate their literals; kerning
/// numbers are skipped.
fn extract_show_operators(block: &str) -> String {
    let mut out = String::new();
    let mut chars = block.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => {
                out.push_str(&read_literal(&mut chars));
            }
            'T' => {
                if matches!(chars.peek(), Some('d' | 'D' | '*')) {
                    chars.next();
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn read_literal(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut literal = String::new();
    let mut depth = 1u32;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => literal.push('\n'),
                Some('r') => literal.push('\r'),
                Some('t') => literal.push('\t'),
                Some('b') => literal.push('\u{8}'),
                Some('f') => literal.push('\u{c}'),
                Some(d) if d.is_digit(8) => {
                    let mut code = d.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.peek().and_then(|n| n.to_digit(8)) {
                            Some(digit) => {
                                code = code * 8 + digit;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    if let Some(ch) = char::from_u32(code) {
                        literal.push(ch);
                    }
                }
                Some(other) => literal.push(other),
                None => break,
            },
            '(' => {
                depth += 1;
                literal.push('(');
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                literal.push(')');
            }
            _ => literal.push(c),
        }
    }
    literal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use test_case::test_case;

    #[test_case("guide.md", b"# Title", ContentType::Markdown; "markdown by extension")]
    #[test_case("guide.markdown", b"content", ContentType::Markdown; "long markdown extension")]
    #[test_case("page.html", b"<p>hi</p>", ContentType::Html; "html by extension")]
    #[test_case("data.csv", b"a,b\n1,2", ContentType::Tabular; "csv by extension")]
    #[test_case("data.tsv", b"a\tb", ContentType::Tabular; "tsv by extension")]
    #[test_case("notes.txt", b"plain", ContentType::Text; "plain text")]
    #[test_case("weird.xyz", b"still text", ContentType::Text; "unknown extension but utf8")]
    fn test_detect_by_extension(name: &str, bytes: &[u8], expected: ContentType) {
        let detected = detect(Path::new(name), bytes).unwrap();
        assert_eq!(detected, expected);
    }

    #[test]
    fn test_detect_pdf_by_magic_ignores_extension() {
        let detected = detect(Path::new("mislabeled.txt"), b"%PDF-1.4\nrest").unwrap();
        assert_eq!(detected, ContentType::Pdf);
    }

    #[test]
    fn test_detect_rejects_png() {
        let err = detect(Path::new("cert.png"), b"\x89PNG\r\n\x1a\n....").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);
        assert!(err.to_string().contains("PNG"));
    }

    #[test]
    fn test_detect_rejects_unknown_binary() {
        let err = detect(Path::new("blob"), &[0u8, 159, 146, 150]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);
    }

    #[test]
    fn test_detect_rejects_non_utf8_with_text_extension() {
        let err = detect(Path::new("notes.md"), &[0xC3, 0x28, 0xA0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);
    }

    #[test]
    fn test_extract_markdown_passthrough() {
        let text = extract_text(ContentType::Markdown, b"# Risk\n\nMitigate early.").unwrap();
        assert_eq!(text, "# Risk\n\nMitigate early.");
    }

    #[test]
    fn test_extract_html_converts_to_markdown() {
        let html = b"<html><body><h1>Scope</h1><p>Define boundaries.</p></body></html>";
        let text = extract_text(ContentType::Html, html).unwrap();
        assert!(text.contains("Scope"));
        assert!(text.contains("Define boundaries."));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_extract_rejects_whitespace_only() {
        let err = extract_text(ContentType::Text, b"   \n \t ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);
    }

    fn minimal_pdf(stream: &str) -> Vec<u8> {
        format!(
            "%PDF-1.4\n1 0 obj\n<< /Length {} >>\nstream\n{}\nendstream\nendobj\ntrailer\n%%EOF\n",
            stream.len(),
            stream
        )
        .into_bytes()
    }

    #[test]
    fn test_extract_pdf_tj_operator() {
        let pdf = minimal_pdf("BT /F1 12 Tf 72 720 Tm (Hello certification) Tj ET");
        let text = extract_text(ContentType::Pdf, &pdf).unwrap();
        assert_eq!(text, "Hello certification");
    }

    #[test]
    fn test_extract_pdf_tj_array_concatenates() {
        let pdf = minimal_pdf("BT [(Pro)(ject) -250 ( management)] TJ ET");
        let text = extract_text(ContentType::Pdf, &pdf).unwrap();
        assert_eq!(text, "Project management");
    }

    #[test]
    fn test_extract_pdf_line_moves_become_newlines() {
        let pdf = minimal_pdf("BT (First line) Tj 0 -14 Td (Second line) Tj ET");
        let text = extract_text(ContentType::Pdf, &pdf).unwrap();
        assert_eq!(text, "First line\nSecond line");
    }

    #[test]
    fn test_extract_pdf_escapes() {
        let pdf = minimal_pdf(r"BT (scope \(and schedule\) \\ baseline) Tj ET");
        let text = extract_text(ContentType::Pdf, &pdf).unwrap();
        assert_eq!(text, r"scope (and schedule) \ baseline");
    }

    #[test]
    fn test_extract_pdf_multiple_blocks() {
        let pdf = minimal_pdf("BT (Chapter one) Tj ET\nBT (Chapter two) Tj ET");
        let text = extract_text(ContentType::Pdf, &pdf).unwrap();
        assert_eq!(text, "Chapter one\n\nChapter two");
    }

    #[test]
    fn test_extract_pdf_compressed_is_unsupported() {
        let pdf = b"%PDF-1.7\n1 0 obj\n<< /Filter /FlateDecode /Length 10 >>\nstream\n\x78\x9c\x01\x02\nendstream\n%%EOF";
        let err = extract_text(ContentType::Pdf, pdf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);
        assert!(err.to_string().contains("compressed"));
    }
}
