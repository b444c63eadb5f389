//! Local OCR: `pdftoppm` renders the page, `tesseract` reads it.

use super::{OcrInput, OcrPage, OcrProvider, OcrResult};
use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

pub struct TesseractProvider {
    dpi: u32,
    lang: String,
}

impl TesseractProvider {
    pub fn new(dpi: u32, lang: String) -> Self {
        Self { dpi, lang }
    }
}

async fn run(cmd: &mut Command, what: &str) -> anyhow::Result<Vec<u8>> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to spawn {}", what))?;
    if !output.status.success() {
        anyhow::bail!(
            "{} exited with {}: {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

#[async_trait::async_trait]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        let OcrInput::Bytes { filename, data } = input;

        let dir = tempfile::tempdir().context("failed to create OCR work dir")?;
        let pdf_path = dir.path().join("page.pdf");
        let image_stem = dir.path().join("page");
        tokio::fs::write(&pdf_path, data).await?;

        debug!("TesseractProvider: rendering {} at {} dpi", filename, self.dpi);
        run(
            Command::new("pdftoppm")
                .arg("-r")
                .arg(self.dpi.to_string())
                .args(["-f", "1", "-l", "1", "-singlefile", "-png"])
                .arg(&pdf_path)
                .arg(&image_stem),
            "pdftoppm",
        )
        .await?;

        let stdout = run(
            Command::new("tesseract")
                .arg(image_stem.with_extension("png"))
                .arg("stdout")
                .arg("-l")
                .arg(&self.lang),
            "tesseract",
        )
        .await?;

        Ok(OcrResult {
            pages: vec![OcrPage {
                page_num: 1,
                text: String::from_utf8_lossy(&stdout).into_owned(),
            }],
            provider_name: "tesseract".to_string(),
        })
    }
}
