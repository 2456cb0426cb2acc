//! Plain-text extraction for uploaded documents (PDF, DOCX, TXT).
//!
//! Extraction never panics: malformed input maps to [`ExtractError`] and the
//! ingestion pipeline records the failure against the file.

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use quick_xml::events::Event;

use crate::error::ExtractError;
use crate::models::{display_extension, DocumentFormat};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Read `path` and extract its text, choosing the parser by extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        ExtractError::UnsupportedFormat(display_extension(&name))
    })?;
    let bytes = std::fs::read(path)?;
    extract_text(&bytes, format)
}

/// Extract text from in-memory bytes. Fails with
/// [`ExtractError::EmptyContent`] when nothing but whitespace comes out.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Txt => decode_text(bytes),
    };
    if text.trim().is_empty() {
        return Err(ExtractError::EmptyContent);
    }
    Ok(text)
}

/// UTF-8, falling back to Latin-1 so legacy encodings never fail.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed object streams.
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Corrupt {
            format: "PDF",
            reason: e.to_string(),
        }),
        Err(_) => Err(ExtractError::Corrupt {
            format: "PDF",
            reason: "parser aborted on malformed content".to_string(),
        }),
    }
}

fn docx_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Corrupt {
        format: "DOCX",
        reason: e.to_string(),
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => docx_error(format!("{} not found", name)),
        other => docx_error(other),
    })?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(docx_error)?;
    if out.len() as u64 >= max_bytes {
        return Err(docx_error(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(docx_error)?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_wordprocessing_text(&doc_xml)
}

/// Walk `w:body`, keeping the text of `w:t` runs. Paragraphs (including
/// those inside table cells) end with a newline; `w:tab` and `w:br` map to
/// their whitespace.
fn extract_wordprocessing_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(docx_error)?.as_ref());
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(docx_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
