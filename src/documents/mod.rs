// Document text extraction
// Uploaded files are dispatched by extension: PDFs through pdf-extract, everything else as UTF-8

#[cfg(test)]
mod tests;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use tracing::debug;

use crate::{KnowledgeError, Result};

const UTF8_BOM: char = '\u{feff}';

/// How an uploaded file is turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    #[inline]
    pub fn from_filename(filename: &str) -> Self {
        let is_pdf = Path::new(filename)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf { Self::Pdf } else { Self::PlainText }
    }
}

/// Extract the text of an uploaded file
#[inline]
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    let kind = DocumentKind::from_filename(filename);
    debug!("Extracting {} bytes from {} as {:?}", bytes.len(), filename, kind);

    match kind {
        DocumentKind::Pdf => extract_pdf(bytes, filename),
        DocumentKind::PlainText => extract_plain_text(bytes, filename),
    }
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    // pdf-extract panics on some malformed inputs instead of returning an error
    let outcome = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));

    match outcome {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(KnowledgeError::ExtractionFailed(format!(
            "{filename} is not a readable PDF: {e}"
        ))),
        Err(_) => Err(KnowledgeError::ExtractionFailed(format!(
            "{filename} is not a readable PDF"
        ))),
    }
}

fn extract_plain_text(bytes: &[u8], filename: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        KnowledgeError::ExtractionFailed(format!("{filename} is not valid UTF-8: {e}"))
    })?;

    Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
}
