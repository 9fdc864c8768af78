//! Byte stream to UTF-8 text.

use anyhow::{anyhow, Context, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// Text from every page in page order, pages joined without a separator.
///
/// Pages whose text cannot be decoded are skipped; a file that does not parse
/// as PDF at all is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(bytes).context("failed to parse PDF")?;
        let pages = doc.get_pages();
        let mut text = String::new();
        let mut skipped = 0usize;

        for page_number in pages.keys() {
            match doc.extract_text(&[*page_number]) {
                Ok(page_text) => text.push_str(&page_text),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(page = page_number, "skipping PDF page: {err}");
                }
            }
        }

        if skipped > 0 && skipped == pages.len() {
            return Err(anyhow!("no page of {} could be read", pages.len()));
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(bytes).context("document is not valid UTF-8")?;
        Ok(text.to_owned())
    }
}

/// Picks the PDF extractor when the bytes start with `%PDF-`, plain text
/// otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoExtractor {
    pdf: PdfExtractor,
    plain: PlainTextExtractor,
}

impl DocumentExtractor for AutoExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        if bytes.starts_with(PDF_MAGIC) {
            self.pdf.extract(bytes)
        } else {
            self.plain.extract(bytes)
        }
    }
}
