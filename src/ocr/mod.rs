//! OCR fallback for receipts without a usable text layer.
//!
//! Defines the [`OcrProvider`] trait so backends (local Tesseract, Docling
//! sidecar) can be swapped via `OCR_PROVIDER`. Detection only ever asks for
//! the first page, through [`first_page_text`], which never fails loudly.

pub mod docling;
pub mod tesseract;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::OcrSettings;
use crate::pdf::ReceiptDocument;

/// Per-page OCR output (always 1-indexed).
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub page_num: u32,
    pub text: String,
}

/// Unified OCR result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub pages: Vec<OcrPage>,
    pub provider_name: String,
}

impl OcrResult {
    /// Text of page 1, if the provider returned it.
    pub fn first_page(&self) -> Option<&str> {
        self.pages
            .iter()
            .find(|p| p.page_num == 1)
            .map(|p| p.text.as_str())
    }
}

/// Input to an OCR provider: a single-page PDF.
pub enum OcrInput {
    Bytes { filename: String, data: Vec<u8> },
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult>;
}

/// Known provider identifiers used for registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    Tesseract,
    Docling,
}

impl OcrProviderKind {
    /// Parse an `OCR_PROVIDER` value into a provider kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tesseract" => Some(Self::Tesseract),
            "docling" => Some(Self::Docling),
            _ => None,
        }
    }
}

/// Build the configured provider, or `None` when OCR is disabled or unknown.
pub fn from_settings(settings: &OcrSettings) -> Option<Arc<dyn OcrProvider>> {
    if !settings.enabled {
        return None;
    }
    match OcrProviderKind::from_str(&settings.provider) {
        Some(OcrProviderKind::Tesseract) => Some(Arc::new(tesseract::TesseractProvider::new(
            settings.dpi,
            settings.lang.clone(),
        ))),
        Some(OcrProviderKind::Docling) => Some(Arc::new(docling::DoclingProvider::new(
            reqwest::Client::new(),
            settings.docling_url.clone(),
        ))),
        None => {
            warn!("Unknown OCR_PROVIDER '{}', OCR fallback disabled", settings.provider);
            None
        }
    }
}

/// OCR the first page of `doc`. Any failure (page slicing, backend error,
/// blank output) is logged and reported as `None`.
pub async fn first_page_text(provider: &dyn OcrProvider, doc: &ReceiptDocument) -> Option<String> {
    let data = match doc.first_page_pdf().await {
        Ok(data) => data,
        Err(e) => {
            warn!("OCR skipped for {}: {}", doc.name(), e);
            return None;
        }
    };

    let input = OcrInput::Bytes {
        filename: doc.name().to_string(),
        data,
    };

    match provider.process(&input).await {
        Ok(result) => {
            let text = result.first_page().unwrap_or_default().trim().to_string();
            debug!(
                "OCR via {} returned {} chars for {}",
                result.provider_name,
                text.len(),
                doc.name()
            );
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            warn!("OCR via {} failed for {}: {:#}", provider.name(), doc.name(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::build_pdf;
    use lopdf::Document;
    use std::sync::Mutex;

    struct Recording {
        pages_seen: Mutex<Vec<usize>>,
        reply: Result<&'static str, &'static str>,
    }

    #[async_trait::async_trait]
    impl OcrProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
            let OcrInput::Bytes { data, .. } = input;
            let pages = Document::load_mem(data)
                .map_err(|e| anyhow::anyhow!("bad page pdf: {}", e))?
                .get_pages()
                .len();
            self.pages_seen.lock().unwrap().push(pages);
            match self.reply {
                Ok(text) => Ok(OcrResult {
                    pages: vec![OcrPage {
                        page_num: 1,
                        text: text.to_string(),
                    }],
                    provider_name: "recording".to_string(),
                }),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }
    }

    fn recording(reply: Result<&'static str, &'static str>) -> Recording {
        Recording {
            pages_seen: Mutex::new(Vec::new()),
            reply,
        }
    }

    #[tokio::test]
    async fn test_only_first_page_is_sent() {
        let provider = recording(Ok("DENIZBANK A.S."));
        let doc = ReceiptDocument::from_bytes("r.pdf", build_pdf(&["a", "b", "c"]));

        let text = first_page_text(&provider, &doc).await;
        assert_eq!(text.as_deref(), Some("DENIZBANK A.S."));
        assert_eq!(*provider.pages_seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_provider_error_is_none() {
        let provider = recording(Err("tesseract exited with status 1"));
        let doc = ReceiptDocument::from_bytes("r.pdf", build_pdf(&["a"]));
        assert_eq!(first_page_text(&provider, &doc).await, None);
    }

    #[tokio::test]
    async fn test_blank_output_is_none() {
        let provider = recording(Ok("  \n "));
        let doc = ReceiptDocument::from_bytes("r.pdf", build_pdf(&["a"]));
        assert_eq!(first_page_text(&provider, &doc).await, None);
    }

    #[tokio::test]
    async fn test_unreadable_pdf_skips_provider() {
        let provider = recording(Ok("never"));
        let doc = ReceiptDocument::from_bytes("r.pdf", b"junk".to_vec());
        assert_eq!(first_page_text(&provider, &doc).await, None);
        assert!(provider.pages_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_provider_kind_and_settings() {
        assert_eq!(OcrProviderKind::from_str("tesseract"), Some(OcrProviderKind::Tesseract));
        assert_eq!(OcrProviderKind::from_str("docling"), Some(OcrProviderKind::Docling));
        assert_eq!(OcrProviderKind::from_str("mistral"), None);

        let mut settings = OcrSettings {
            enabled: false,
            provider: "tesseract".to_string(),
            dpi: 350,
            lang: "tur+eng".to_string(),
            docling_url: "http://localhost:3001".to_string(),
        };
        assert!(from_settings(&settings).is_none());
        settings.enabled = true;
        assert_eq!(from_settings(&settings).map(|p| p.name().to_string()).as_deref(), Some("tesseract"));
        settings.provider = "bogus".to_string();
        assert!(from_settings(&settings).is_none());
    }
}
