//! Text extraction from saved attachment files.
//!
//! Investor updates ship their numbers in decks and spreadsheets at least
//! as often as in the email body, so every saved attachment goes through
//! format-specific extraction before metrics extraction. Spreadsheets are
//! rendered as markdown tables to keep row/column structure visible to
//! the oracle.

use std::path::Path;

use crate::error::ExtractError;

/// Raw extraction cap (bytes). The oracle prompt truncates further.
const MAX_EXTRACT_BYTES: usize = 100_000;

/// Attachment formats we can pull text out of, detected by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentFormat {
    /// .txt, .csv, .tsv, .md, .json, .log — read as text
    PlainText,
    /// .pdf
    Pdf,
    /// .docx
    Docx,
    /// .xlsx, .xls, .xlsm, .ods
    Spreadsheet,
    /// .pptx
    Pptx,
    /// .html, .htm
    Html,
    /// Everything else (images, archives, binaries)
    Unsupported,
}

/// Detect the attachment format from its file extension.
pub fn detect_format(path: &Path) -> AttachmentFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "txt" | "csv" | "tsv" | "md" | "json" | "log" => AttachmentFormat::PlainText,
        "pdf" => AttachmentFormat::Pdf,
        "docx" => AttachmentFormat::Docx,
        "xlsx" | "xls" | "xlsm" | "ods" => AttachmentFormat::Spreadsheet,
        "pptx" => AttachmentFormat::Pptx,
        "html" | "htm" => AttachmentFormat::Html,
        _ => AttachmentFormat::Unsupported,
    }
}

/// Whether text extraction is worth attempting for this file.
pub fn is_extractable(path: &Path) -> bool {
    !matches!(detect_format(path), AttachmentFormat::Unsupported)
}

/// Extract text from a saved attachment, truncated to [`MAX_EXTRACT_BYTES`].
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    let raw = match detect_format(path) {
        AttachmentFormat::PlainText => extract_plaintext(path)?,
        AttachmentFormat::Pdf => extract_pdf(path)?,
        AttachmentFormat::Docx => extract_docx(path)?,
        AttachmentFormat::Spreadsheet => extract_spreadsheet(path)?,
        AttachmentFormat::Pptx => extract_pptx(path)?,
        AttachmentFormat::Html => extract_html(path)?,
        AttachmentFormat::Unsupported => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string();
            return Err(ExtractError::UnsupportedFormat(ext));
        }
    };

    Ok(truncate_text(&raw, MAX_EXTRACT_BYTES))
}

// ---------------------------------------------------------------------------
// Format-specific extractors
// ---------------------------------------------------------------------------

fn extract_plaintext(path: &Path) -> Result<String, ExtractError> {
    // Try UTF-8 first, fall back to lossy conversion
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(_) => {
            let bytes = std::fs::read(path)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed PDFs — wrap in catch_unwind
    let path_buf = path.to_path_buf();
    let result = std::panic::catch_unwind(move || pdf_extract::extract_text(&path_buf));

    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::ExtractionFailed(format!("PDF: {}", e))),
        Err(_) => Err(ExtractError::ExtractionFailed(
            "PDF extraction panicked (malformed file)".to_string(),
        )),
    }
}

fn extract_docx(path: &Path) -> Result<String, ExtractError> {
    // DOCX = ZIP archive containing word/document.xml; text lives in <w:t>
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ExtractError::ExtractionFailed(format!("DOCX zip: {}", e)))?;

    let doc = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::ExtractionFailed(format!("DOCX missing document.xml: {}", e)))?;

    let mut reader = quick_xml::Reader::from_reader(std::io::BufReader::new(doc));
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"t" {
                    in_text_run = true;
                } else if local.as_ref() == b"p" && !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Ok(quick_xml::events::Event::End(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = false;
                }
            }
            Ok(quick_xml::events::Event::Text(ref e)) => {
                if in_text_run {
                    if let Ok(s) = e.unescape() {
                        text.push_str(&s);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::ExtractionFailed(format!("DOCX XML: {}", e)));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn extract_spreadsheet(path: &Path) -> Result<String, ExtractError> {
    use calamine::{open_workbook_auto, Reader};

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ExtractError::ExtractionFailed(format!("Spreadsheet: {}", e)))?;

    let mut output = String::new();

    for sheet_name in workbook.sheet_names().to_vec() {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !output.is_empty() {
            output.push_str("\n\n");
        }
        output.push_str(&format!("## {}\n\n", sheet_name));

        // Markdown table: first row is the header
        let mut rows = range.rows();
        if let Some(header) = rows.next() {
            let header_cells: Vec<String> = header.iter().map(cell_to_string).collect();
            output.push_str("| ");
            output.push_str(&header_cells.join(" | "));
            output.push_str(" |\n| ");
            output.push_str(
                &header_cells
                    .iter()
                    .map(|_| "---")
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
            output.push_str(" |\n");

            for row in rows {
                let cells: Vec<String> = row.iter().map(cell_to_string).collect();
                output.push_str("| ");
                output.push_str(&cells.join(" | "));
                output.push_str(" |\n");
            }
        }
    }

    Ok(output)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

fn extract_pptx(path: &Path) -> Result<String, ExtractError> {
    // PPTX = ZIP archive containing ppt/slides/slideN.xml; text lives in <a:t>
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ExtractError::ExtractionFailed(format!("PPTX zip: {}", e)))?;

    let mut slide_names: Vec<String> = (0..archive.len())
        .filter_map(|i| {
            let name = archive.by_index(i).ok()?.name().to_string();
            if name.starts_with("ppt/slides/slide") && name.ends_with(".xml") {
                Some(name)
            } else {
                None
            }
        })
        .collect();
    slide_names.sort();

    let mut text = String::new();
    for (idx, slide_name) in slide_names.iter().enumerate() {
        let slide = archive.by_name(slide_name).map_err(|e| {
            ExtractError::ExtractionFailed(format!("PPTX slide {}: {}", slide_name, e))
        })?;

        if idx > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&format!("--- Slide {} ---\n", idx + 1));

        let mut reader = quick_xml::Reader::from_reader(std::io::BufReader::new(slide));
        let mut buf = Vec::new();
        let mut in_text_run = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(quick_xml::events::Event::Start(ref e)) => {
                    if e.local_name().as_ref() == b"t" {
                        in_text_run = true;
                    }
                }
                Ok(quick_xml::events::Event::End(ref e)) => {
                    if e.local_name().as_ref() == b"t" {
                        in_text_run = false;
                    }
                }
                Ok(quick_xml::events::Event::Text(ref e)) => {
                    if in_text_run {
                        if let Ok(s) = e.unescape() {
                            text.push_str(&s);
                            text.push(' ');
                        }
                    }
                }
                Ok(quick_xml::events::Event::Eof) => break,
                Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
    }

    Ok(text)
}

fn extract_html(path: &Path) -> Result<String, ExtractError> {
    let html = std::fs::read_to_string(path)?;
    html2text::from_read(html.as_bytes(), 80)
        .map_err(|e| ExtractError::ExtractionFailed(format!("HTML: {}", e)))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Truncate text at a safe UTF-8 boundary.
fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut result = text[..end].to_string();
    result.push_str("\n\n[... content truncated ...]");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("deck.pdf")), AttachmentFormat::Pdf);
        assert_eq!(
            detect_format(Path::new("update.docx")),
            AttachmentFormat::Docx
        );
        assert_eq!(
            detect_format(Path::new("financials.xlsx")),
            AttachmentFormat::Spreadsheet
        );
        assert_eq!(
            detect_format(Path::new("financials.XLS")),
            AttachmentFormat::Spreadsheet
        );
        assert_eq!(
            detect_format(Path::new("board.pptx")),
            AttachmentFormat::Pptx
        );
        assert_eq!(
            detect_format(Path::new("kpis.csv")),
            AttachmentFormat::PlainText
        );
        assert_eq!(
            detect_format(Path::new("page.html")),
            AttachmentFormat::Html
        );
        assert_eq!(
            detect_format(Path::new("logo.png")),
            AttachmentFormat::Unsupported
        );
        assert_eq!(
            detect_format(Path::new("no_extension")),
            AttachmentFormat::Unsupported
        );
    }

    #[test]
    fn test_is_extractable() {
        assert!(is_extractable(Path::new("deck.pdf")));
        assert!(is_extractable(Path::new("kpis.csv")));
        assert!(!is_extractable(Path::new("logo.png")));
    }

    #[test]
    fn test_extract_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kpis.csv");
        std::fs::write(&path, "metric,value\nARR,$1.2M\n").unwrap();

        let text = extract_text(&path).unwrap();
        assert!(text.contains("ARR,$1.2M"));
    }

    #[test]
    fn test_extract_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, [0x89, 0x50, 0x4E, 0x47]).unwrap();

        match extract_text(&path) {
            Err(ExtractError::UnsupportedFormat(ext)) => assert_eq!(ext, "png"),
            other => panic!("Expected UnsupportedFormat, got: {:?}", other),
        }
    }

    #[test]
    fn test_extract_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.html");
        std::fs::write(
            &path,
            "<html><body><h1>May Update</h1><p>ARR reached $1.2M</p></body></html>",
        )
        .unwrap();

        let text = extract_text(&path).unwrap();
        assert!(text.contains("May Update"));
        assert!(text.contains("$1.2M"));
    }

    #[test]
    fn test_truncation_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.txt");
        std::fs::write(&path, "x".repeat(150_000)).unwrap();

        let text = extract_text(&path).unwrap();
        assert!(text.len() < 150_000);
        assert!(text.contains("[... content truncated ...]"));
    }
}
