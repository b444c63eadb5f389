//! Per-request PDF context.
//!
//! Reads the upload once, extracts the text layer of the first pages once
//! and normalizes it once, so every detection stage shares the same text.

use std::sync::OnceLock;

use lopdf::Document;
use thiserror::Error;
use tracing::{debug, warn};

use crate::normalize::normalize_text;

/// Pages read for the text layer unless configured otherwise.
pub const DEFAULT_TEXT_PAGES: usize = 2;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("failed to load PDF: {0}")]
    Load(lopdf::Error),
    #[error("PDF has no pages")]
    NoPages,
    #[error("failed to write PDF: {0}")]
    Write(#[from] std::io::Error),
    #[error("PDF worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// An uploaded receipt with lazily cached text.
#[derive(Debug)]
pub struct ReceiptDocument {
    name: String,
    bytes: Vec<u8>,
    text_pages: usize,
    text_raw: OnceLock<String>,
    text_norm: OnceLock<String>,
}

impl ReceiptDocument {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            text_pages: DEFAULT_TEXT_PAGES,
            text_raw: OnceLock::new(),
            text_norm: OnceLock::new(),
        }
    }

    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.pdf".to_string());
        Ok(Self::from_bytes(name, bytes))
    }

    /// Use text an upstream extractor already produced instead of lopdf.
    pub fn with_text_layer(mut self, raw: impl Into<String>) -> Self {
        self.text_raw = OnceLock::from(raw.into());
        self.text_norm = OnceLock::new();
        self
    }

    pub fn with_text_pages(mut self, pages: usize) -> Self {
        self.text_pages = pages.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw text layer of the first pages; empty when the PDF cannot be read.
    pub fn text_raw(&self) -> &str {
        self.text_raw.get_or_init(|| {
            extract_text(&self.bytes, self.text_pages).unwrap_or_else(|e| {
                warn!("Text layer unavailable for {}: {}", self.name, e);
                String::new()
            })
        })
    }

    pub fn text_norm(&self) -> &str {
        self.text_norm.get_or_init(|| normalize_text(self.text_raw()))
    }

    /// Parse the text layer on the blocking pool so lopdf never stalls an
    /// async worker. Later `text_raw`/`text_norm` calls hit the cache.
    pub async fn extract_text_layer(self) -> Result<Self, PdfError> {
        let doc = tokio::task::spawn_blocking(move || {
            self.text_norm();
            self
        })
        .await?;
        Ok(doc)
    }

    /// A standalone PDF holding only page 1, sliced on the blocking pool.
    pub async fn first_page_pdf(&self) -> Result<Vec<u8>, PdfError> {
        let bytes = self.bytes.clone();
        tokio::task::spawn_blocking(move || first_page_only(&bytes)).await?
    }
}

/// Quick check for the `%PDF-` header, ignoring leading whitespace.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"%PDF-")
}

/// Extract text from the first `max_pages` pages using lopdf.
pub fn extract_text(data: &[u8], max_pages: usize) -> Result<String, PdfError> {
    let doc = Document::load_mem(data).map_err(PdfError::Load)?;

    let mut text = String::new();
    for page_num in doc.get_pages().keys().take(max_pages) {
        match doc.extract_text(&[*page_num]) {
            Ok(content) => {
                text.push_str(&content);
                text.push('\n');
            }
            Err(e) => debug!("No text on page {}: {}", page_num, e),
        }
    }

    Ok(text)
}

fn first_page_only(data: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::load_mem(data).map_err(PdfError::Load)?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(PdfError::NoPages);
    }
    let rest: Vec<u32> = pages.keys().copied().filter(|n| *n > 1).collect();
    if !rest.is_empty() {
        doc.delete_pages(&rest);
        doc.prune_objects();
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// In-memory PDFs for tests.
#[cfg(test)]
pub(crate) mod testing {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// One page per entry, each drawing its text with a base-14 font.
    pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12i64.into()]),
                    Operation::new("Td", vec![50i64.into(), 700i64.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0i64.into(), 0i64.into(), 595i64.into(), 842i64.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }
}
