//! Bank classification pipeline.
//!
//! Strategies run in a fixed order and stop at the first hit:
//!
//! 1. bank domains in the text layer (all profiles, table order)
//! 2. bank-name markers in the text layer
//! 3. OCR of the first page, only when 1-2 found nothing
//! 4. domains, then name markers, in the OCR text, allowlisted banks only
//!
//! No match is a valid outcome (`None`), never an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{BankProfile, DetectionConfig, NameMarkerRule};
use crate::domain::{contains_token, has_domain};
use crate::normalize::normalize_text;
use crate::ocr::{self, OcrProvider};
use crate::pdf::ReceiptDocument;
use crate::registry::ParserRegistry;
use crate::variant::VariantResolver;

/// Strategy that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    TextDomain,
    TextName,
    OcrDomain,
    OcrName,
}

/// Which bank issued a receipt, and how we know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub key: String,
    pub bank: String,
    pub variant: Option<String>,
    pub method: DetectionMethod,
}

impl DetectionResult {
    fn new(profile: &BankProfile, method: DetectionMethod) -> Self {
        Self {
            key: profile.key.clone(),
            bank: profile.name.clone(),
            variant: None,
            method,
        }
    }
}

/// A match plus the normalized text it was found in.
struct Evidence {
    result: DetectionResult,
    text_norm: String,
}

/// Every stage evaluated independently, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionTrace {
    pub file: String,
    pub text_chars: usize,
    pub text_sample: String,
    pub text_domain: Option<DetectionResult>,
    pub text_name: Option<DetectionResult>,
    pub ocr: Option<OcrTrace>,
    #[serde(rename = "final")]
    pub final_result: Option<DetectionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrTrace {
    pub provider: String,
    pub chars: usize,
    pub ocr_domain: Option<DetectionResult>,
    pub ocr_name: Option<DetectionResult>,
}

/// The classifier plus the variant resolver that refines its output.
pub struct BankDetector {
    config: Arc<DetectionConfig>,
    ocr: Option<Arc<dyn OcrProvider>>,
    resolver: VariantResolver,
}

impl BankDetector {
    pub fn new(
        config: Arc<DetectionConfig>,
        registry: Arc<dyn ParserRegistry>,
        ocr: Option<Arc<dyn OcrProvider>>,
    ) -> Self {
        let resolver = VariantResolver::new(&config.variant_rules, registry);
        Self {
            config,
            ocr,
            resolver,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr.is_some()
    }

    /// Which bank issued `doc`; `variant` is always `None` here.
    pub async fn classify(&self, doc: &ReceiptDocument) -> Option<DetectionResult> {
        self.classify_with_evidence(doc).await.map(|e| e.result)
    }

    /// Classify, then resolve the variant against the text the match came from.
    pub async fn detect(&self, doc: &ReceiptDocument) -> Option<DetectionResult> {
        let evidence = self.classify_with_evidence(doc).await?;
        let refined = self.resolver.refine(evidence.result, &evidence.text_norm);
        info!(
            "Detected {} as {} (variant={:?}, method={:?})",
            doc.name(),
            refined.key,
            refined.variant,
            refined.method
        );
        Some(refined)
    }

    async fn classify_with_evidence(&self, doc: &ReceiptDocument) -> Option<Evidence> {
        let text = doc.text_norm();
        debug!("{}: text layer has {} chars", doc.name(), text.len());

        if let Some(result) = self
            .match_text_domain(text)
            .or_else(|| self.match_text_name(text))
        {
            return Some(Evidence {
                result,
                text_norm: text.to_string(),
            });
        }

        let provider = self.ocr.as_deref()?;
        debug!("{}: no text-layer match, trying OCR via {}", doc.name(), provider.name());

        let ocr_text = normalize_text(&ocr::first_page_text(provider, doc).await?);
        let result = self
            .match_ocr_domain(&ocr_text)
            .or_else(|| self.match_ocr_name(&ocr_text));
        if result.is_none() {
            debug!("{}: OCR text matched no allowlisted bank", doc.name());
        }
        result.map(|result| Evidence {
            result,
            text_norm: ocr_text,
        })
    }

    /// Run every stage regardless of earlier hits. OCR still runs at most
    /// once; the final result is picked from the stages already computed.
    pub async fn trace(&self, doc: &ReceiptDocument) -> DetectionTrace {
        let text = doc.text_norm();
        let text_domain = self.match_text_domain(text);
        let text_name = self.match_text_name(text);

        let mut ocr_text = String::new();
        let ocr = match self.ocr.as_deref() {
            Some(provider) => {
                ocr_text = ocr::first_page_text(provider, doc)
                    .await
                    .map(|t| normalize_text(&t))
                    .unwrap_or_default();
                Some(OcrTrace {
                    provider: provider.name().to_string(),
                    chars: ocr_text.chars().count(),
                    ocr_domain: self.match_ocr_domain(&ocr_text),
                    ocr_name: self.match_ocr_name(&ocr_text),
                })
            }
            None => None,
        };

        let from_text = text_domain.clone().or_else(|| text_name.clone());
        let final_result = match from_text {
            Some(result) => Some(self.resolver.refine(result, text)),
            None => ocr
                .as_ref()
                .and_then(|o| o.ocr_domain.clone().or_else(|| o.ocr_name.clone()))
                .map(|result| self.resolver.refine(result, &ocr_text)),
        };

        DetectionTrace {
            file: doc.name().to_string(),
            text_chars: doc.text_raw().chars().count(),
            text_sample: doc.text_raw().trim().replace('\r', "").chars().take(300).collect(),
            text_domain,
            text_name,
            ocr,
            final_result,
        }
    }

    pub fn match_text_domain(&self, text_norm: &str) -> Option<DetectionResult> {
        find_by_domain(self.config.banks.iter(), text_norm)
            .map(|p| DetectionResult::new(p, DetectionMethod::TextDomain))
    }

    pub fn match_text_name(&self, text_norm: &str) -> Option<DetectionResult> {
        find_by_name(&self.config.name_markers, text_norm)
            .and_then(|key| self.config.bank(key))
            .map(|p| DetectionResult::new(p, DetectionMethod::TextName))
    }

    pub fn match_ocr_domain(&self, text_norm: &str) -> Option<DetectionResult> {
        find_by_domain(self.ocr_profiles(), text_norm)
            .map(|p| DetectionResult::new(p, DetectionMethod::OcrDomain))
    }

    pub fn match_ocr_name(&self, text_norm: &str) -> Option<DetectionResult> {
        let allowed: Vec<NameMarkerRule> = self
            .config
            .name_markers
            .iter()
            .filter(|rule| self.config.ocr_allowlist.contains(&rule.key))
            .cloned()
            .collect();
        find_by_name(&allowed, text_norm)
            .and_then(|key| self.config.bank(key))
            .map(|p| DetectionResult::new(p, DetectionMethod::OcrName))
    }

    /// Allowlisted profiles, in bank-table order.
    fn ocr_profiles(&self) -> impl Iterator<Item = &BankProfile> {
        self.config
            .banks
            .iter()
            .filter(|b| self.config.ocr_allowlist.contains(&b.key))
    }
}

fn find_by_domain<'a>(
    mut profiles: impl Iterator<Item = &'a BankProfile>,
    text_norm: &str,
) -> Option<&'a BankProfile> {
    if text_norm.is_empty() {
        return None;
    }
    profiles.find(|p| p.domains.iter().any(|d| has_domain(text_norm, d)))
}

fn find_by_name<'a>(rules: &'a [NameMarkerRule], text_norm: &str) -> Option<&'a str> {
    if text_norm.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|rule| rule.markers.iter().any(|m| contains_token(text_norm, m)))
        .map(|rule| rule.key.as_str())
}
