//! Variant resolution: picks a bank's receipt sub-format and, where the
//! sub-format has its own parser, the key to route to.
//!
//! Rules are data ([`VariantRuleConfig`]) compiled once into a lookup table
//! keyed by bank. A rule may propose a different parser key; that proposal is
//! only honoured when the parser registry knows the key.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Marker, Script, VariantRuleConfig};
use crate::detector::DetectionResult;
use crate::registry::ParserRegistry;

/// Outcome of [`VariantResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub key: String,
    /// `None`: the bank has no variant concept. `Some("UNKNOWN")`: it does,
    /// but no marker matched.
    pub variant: Option<String>,
}

enum CompiledMarker {
    Phrase(String),
    Word(Regex),
    Script(Script),
}

impl CompiledMarker {
    fn compile(marker: &Marker) -> Option<Self> {
        match marker {
            Marker::Phrase { text } => Some(Self::Phrase(text.clone())),
            Marker::Word { text } => {
                let pattern = format!(r"\b{}\b", regex::escape(text));
                match Regex::new(&pattern) {
                    Ok(re) => Some(Self::Word(re)),
                    Err(e) => {
                        warn!("Skipping invalid word marker '{}': {}", text, e);
                        None
                    }
                }
            }
            Marker::Script { script } => Some(Self::Script(*script)),
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Phrase(p) => !p.is_empty() && text.contains(p.as_str()),
            Self::Word(re) => re.is_match(text),
            Self::Script(Script::Arabic) => text.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c)),
        }
    }
}

struct CompiledArm {
    variant: String,
    key: Option<String>,
    markers: Vec<CompiledMarker>,
}

struct CompiledRule {
    arms: Vec<CompiledArm>,
    fallback_variant: String,
}

impl CompiledRule {
    /// Proposed (key, variant); `key` is `None` when the arm keeps the bank key.
    fn apply(&self, text: &str) -> (Option<&str>, &str) {
        self.arms
            .iter()
            .find(|arm| arm.markers.iter().any(|m| m.matches(text)))
            .map(|arm| (arm.key.as_deref(), arm.variant.as_str()))
            .unwrap_or((None, self.fallback_variant.as_str()))
    }
}

/// Strategy table from bank key to variant rule, plus the registry used by
/// the re-keying guard.
pub struct VariantResolver {
    rules: HashMap<String, CompiledRule>,
    registry: Arc<dyn ParserRegistry>,
}

impl VariantResolver {
    pub fn new(rules: &[VariantRuleConfig], registry: Arc<dyn ParserRegistry>) -> Self {
        let mut compiled = HashMap::new();
        for rule in rules {
            let arms = rule
                .arms
                .iter()
                .map(|arm| CompiledArm {
                    variant: arm.variant.clone(),
                    key: arm.key.clone(),
                    markers: arm.markers.iter().filter_map(CompiledMarker::compile).collect(),
                })
                .collect();
            if compiled
                .insert(
                    rule.bank_key.clone(),
                    CompiledRule {
                        arms,
                        fallback_variant: rule.fallback_variant.clone(),
                    },
                )
                .is_some()
            {
                warn!("Duplicate variant rule for '{}', keeping the last one", rule.bank_key);
            }
        }
        debug!("Compiled {} variant rules", compiled.len());
        Self {
            rules: compiled,
            registry,
        }
    }

    /// Decide the variant for `bank_key` from normalized text.
    pub fn resolve(&self, bank_key: &str, text_norm: &str) -> Resolution {
        let Some(rule) = self.rules.get(bank_key) else {
            return Resolution {
                key: bank_key.to_string(),
                variant: None,
            };
        };

        let (proposed, variant) = rule.apply(text_norm);
        let key = match proposed {
            Some(k) if k != bank_key && !self.registry.contains(k) => {
                debug!(
                    "Variant {} proposed unregistered parser key '{}', keeping '{}'",
                    variant, k, bank_key
                );
                bank_key
            }
            Some(k) => k,
            None => bank_key,
        };

        Resolution {
            key: key.to_string(),
            variant: Some(variant.to_string()),
        }
    }

    /// New detection with the resolved key and variant.
    pub fn refine(&self, detected: DetectionResult, text_norm: &str) -> DetectionResult {
        let resolution = self.resolve(&detected.key, text_norm);
        DetectionResult {
            key: resolution.key,
            variant: resolution.variant,
            ..detected
        }
    }
}
