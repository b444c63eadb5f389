//! Docling sidecar OCR provider.

use super::{OcrInput, OcrPage, OcrProvider, OcrResult};
use serde::Deserialize;
use tracing::info;

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    pages: Vec<DoclingPageContent>,
}

#[derive(Debug, Deserialize)]
struct DoclingPageContent {
    page_num: u32,
    text: String,
}

pub struct DoclingProvider {
    url: String,
    client: reqwest::Client,
}

impl DoclingProvider {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for DoclingProvider {
    fn name(&self) -> &str {
        "docling"
    }

    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        use reqwest::multipart::{Form, Part};

        let OcrInput::Bytes { filename, data } = input;
        info!("DoclingProvider: sending {} ({} bytes)", filename, data.len());

        let part = Part::bytes(data.clone())
            .file_name(filename.clone())
            .mime_str("application/pdf")?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Docling sidecar error ({}): {}", status, error_text);
        }

        let docling: DoclingResponse = response.json().await?;

        Ok(OcrResult {
            pages: docling
                .pages
                .into_iter()
                .map(|p| OcrPage {
                    page_num: p.page_num,
                    text: p.text,
                })
                .collect(),
            provider_name: "docling".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let json = r#"{
            "markdown": "ignored",
            "pages": [{"page_num": 1, "text": "DenizBank A.Ş."}],
            "total_pages": 1
        }"#;
        let parsed: DoclingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.pages.len(), 1);
        assert_eq!(parsed.pages[0].page_num, 1);
    }

    #[test]
    fn test_url_trailing_slash() {
        let provider = DoclingProvider::new(reqwest::Client::new(), "http://ocr:3001/".to_string());
        assert_eq!(provider.url, "http://ocr:3001");
    }
}
