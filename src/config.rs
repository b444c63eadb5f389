//! Detection tables and server configuration.
//!
//! Bank profiles, the OCR allowlist, name markers and variant rules are
//! static: built in, or loaded once from the JSON file named by
//! `DETECTION_CONFIG`, and read-only afterwards. Server settings come from
//! the environment (`.env` is honoured).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// One supported issuing bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankProfile {
    /// Stable identity token, e.g. "DENIZBANK".
    pub key: String,
    /// Display name, e.g. "DenizBank".
    pub name: String,
    /// Web domains tested against the text layer, in order.
    pub domains: Vec<String>,
}

/// Literal bank-name markers for banks whose receipts omit their domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameMarkerRule {
    pub key: String,
    pub markers: Vec<String>,
}

/// A single test inside a variant arm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marker {
    /// Plain substring of the normalized text.
    Phrase { text: String },
    /// Standalone word (`\b...\b`).
    Word { text: String },
    /// Any character from the given script.
    Script { script: Script },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Arabic,
}

/// One outcome of a variant rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantArm {
    pub variant: String,
    /// Parser key to switch to; `None` keeps the detected key.
    #[serde(default)]
    pub key: Option<String>,
    pub markers: Vec<Marker>,
}

/// Sub-format rule for one bank. Arms are tried in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantRuleConfig {
    pub bank_key: String,
    pub arms: Vec<VariantArm>,
    #[serde(default = "default_fallback_variant")]
    pub fallback_variant: String,
}

fn default_fallback_variant() -> String {
    "UNKNOWN".to_string()
}

/// All static detection tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub banks: Vec<BankProfile>,
    #[serde(default)]
    pub ocr_allowlist: Vec<String>,
    #[serde(default)]
    pub name_markers: Vec<NameMarkerRule>,
    #[serde(default)]
    pub variant_rules: Vec<VariantRuleConfig>,
}

impl DetectionConfig {
    /// Load tables from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection config: {:?}", path))?;

        let config: DetectionConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse detection config: {:?}", path))?;

        if config.banks.is_empty() {
            anyhow::bail!("No bank profiles in {:?}", path);
        }

        info!(
            "Loaded detection config from {:?}: {} banks, {} OCR-allowlisted",
            path,
            config.banks.len(),
            config.ocr_allowlist.len()
        );
        Ok(config.validated())
    }

    /// Built-in tables when `path` is `None`, otherwise the given file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::builtin()),
        }
    }

    pub fn bank(&self, key: &str) -> Option<&BankProfile> {
        self.banks.iter().find(|b| b.key == key)
    }

    /// Drop allowlist and name-marker entries that name no known bank.
    fn validated(mut self) -> Self {
        let known: Vec<String> = self.banks.iter().map(|b| b.key.clone()).collect();

        self.ocr_allowlist.retain(|key| {
            let ok = known.contains(key);
            if !ok {
                warn!("Ignoring OCR allowlist entry for unknown bank '{}'", key);
            }
            ok
        });
        self.name_markers.retain(|rule| {
            let ok = known.contains(&rule.key);
            if !ok {
                warn!("Ignoring name markers for unknown bank '{}'", rule.key);
            }
            ok
        });
        self
    }

    /// The tables shipped with the service.
    pub fn builtin() -> Self {
        let banks = [
            ("ZIRAAT", "Ziraat", "ziraatbank.com.tr"),
            ("YAPIKREDI", "YapiKredi", "yapikredi.com.tr"),
            ("AKBANK", "Akbank", "akbank.com"),
            ("DENIZBANK", "DenizBank", "denizbank.com"),
            ("ENPARA", "Enpara", "enpara.com"),
            ("GARANTI", "Garanti", "garantibbva.com.tr"),
            ("VAKIFBANK", "VakifBank", "vakifbank.com.tr"),
            ("VAKIFKATILIM", "VakifKatilim", "vakifkatilim.com.tr"),
            ("TEB", "TEB", "teb.com.tr"),
            ("KUVEYT_TURK", "KuveytTurk", "kuveytturk.com.tr"),
            ("ING", "ING", "ing.com.tr"),
            ("TURKIYE_FINANS", "TurkiyeFinans", "turkiyefinans.com.tr"),
            ("ISBANK", "TurkiyeIsBankasi", "isbank.com.tr"),
            ("HALKBANK", "Halkbank", "halkbank.com.tr"),
            ("QNB", "QNB", "qnb.com.tr"),
            ("PTTBANK", "PttBank", "pttbank.ptt.gov.tr"),
            ("TOMBANK", "TOM Bank", "tombank.com.tr"),
        ]
        .into_iter()
        .map(|(key, name, domain)| BankProfile {
            key: key.to_string(),
            name: name.to_string(),
            domains: vec![domain.to_string()],
        })
        .collect();

        Self {
            banks,
            ocr_allowlist: strings(&["DENIZBANK", "KUVEYT_TURK", "ZIRAAT"]),
            name_markers: vec![NameMarkerRule {
                key: "DENIZBANK".to_string(),
                markers: strings(&["denizbank a.s", "denizbank"]),
            }],
            variant_rules: builtin_variant_rules(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn phrases(items: &[&str]) -> Vec<Marker> {
    items
        .iter()
        .map(|s| Marker::Phrase { text: s.to_string() })
        .collect()
}

fn arm(variant: &str, key: Option<&str>, markers: Vec<Marker>) -> VariantArm {
    VariantArm {
        variant: variant.to_string(),
        key: key.map(str::to_string),
        markers,
    }
}

fn rule(bank_key: &str, arms: Vec<VariantArm>) -> VariantRuleConfig {
    VariantRuleConfig {
        bank_key: bank_key.to_string(),
        arms,
        fallback_variant: default_fallback_variant(),
    }
}

fn builtin_variant_rules() -> Vec<VariantRuleConfig> {
    let mut kuveyt_en = phrases(&["transaction details", "sender name", "transactiondate"]);
    kuveyt_en.push(Marker::Word { text: "amount".to_string() });

    vec![
        rule(
            "DENIZBANK",
            vec![arm("FAST", None, vec![Marker::Word { text: "fast".to_string() }])],
        ),
        rule(
            "ZIRAAT",
            vec![
                arm("FAST", Some("ZIRAAT_FAST"), phrases(&["hesaptan fast", "fast mesaj kodu"])),
                arm(
                    "HAVALE",
                    Some("ZIRAAT_HAVALE"),
                    phrases(&["hesaptan hesaba havale", "havale tutari"]),
                ),
            ],
        ),
        rule(
            "YAPIKREDI",
            vec![
                arm("FAST", Some("YAPIKREDI_FAST"), phrases(&["fast gonderimi"])),
                arm(
                    "HAVALE",
                    Some("YAPIKREDI_HAVALE"),
                    phrases(&["havale-borc", "dekont tipi : hvl", "alacakli hesap"]),
                ),
                arm("E_DEKONT", None, phrases(&["elektronik ortamda uretilmistir"])),
                arm("BILGI", None, phrases(&["e-dekont yerine gecmez"])),
            ],
        ),
        rule(
            "GARANTI",
            vec![
                arm("FAST", Some("GARANTI_FAST"), phrases(&["fast ref no"])),
                arm("HAVALE", Some("GARANTI_HAVALE"), phrases(&["alacakli hesap"])),
            ],
        ),
        rule(
            "KUVEYT_TURK",
            vec![
                arm("EN", Some("KUVEYT_TURK_EN"), kuveyt_en),
                arm(
                    "AR",
                    Some("KUVEYT_TURK_AR"),
                    vec![Marker::Script { script: Script::Arabic }],
                ),
                arm("TR", Some("KUVEYT_TURK_TR"), phrases(&["gonderen", "alici", "dekont"])),
            ],
        ),
    ]
}

/// OCR backends selectable via `OCR_PROVIDER`.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub enabled: bool,
    pub provider: String,
    pub dpi: u32,
    pub lang: String,
    pub docling_url: String,
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub text_pages: usize,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub detection_config: Option<PathBuf>,
    pub parser_registry: Option<PathBuf>,
    pub ocr: OcrSettings,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            bind_addr: string_or("BIND_ADDR", "0.0.0.0:3000"),
            text_pages: parse_or(&lookup, "TEXT_PAGES", 2),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 60)),
            max_upload_bytes: upload_limit(&lookup),
            detection_config: lookup("DETECTION_CONFIG").map(PathBuf::from),
            parser_registry: lookup("PARSER_REGISTRY").map(PathBuf::from),
            ocr: OcrSettings {
                enabled: lookup("USE_OCR").as_deref() == Some("1"),
                provider: string_or("OCR_PROVIDER", "tesseract"),
                dpi: parse_or(&lookup, "OCR_DPI", 350),
                lang: string_or("OCR_LANG", "tur+eng"),
                docling_url: string_or("DOCLING_URL", "http://localhost:3001"),
            },
        }
    }
}

const DEFAULT_MAX_UPLOAD_MB: usize = 25;

fn upload_limit<F>(lookup: &F) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    let mb = parse_or(lookup, "MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB);
    mb.checked_mul(1024 * 1024).unwrap_or_else(|| {
        warn!("MAX_UPLOAD_MB={} is out of range, using default {}", mb, DEFAULT_MAX_UPLOAD_MB);
        DEFAULT_MAX_UPLOAD_MB * 1024 * 1024
    })
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {}='{}', using default {}", name, raw, default);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_builtin_allowlist_is_subset() {
        let config = DetectionConfig::builtin();
        for key in &config.ocr_allowlist {
            assert!(config.bank(key).is_some(), "allowlisted {} has no profile", key);
        }
        for rule in &config.name_markers {
            assert!(config.bank(&rule.key).is_some());
        }
    }

    #[test]
    fn test_builtin_keys_unique() {
        let config = DetectionConfig::builtin();
        let mut keys: Vec<&str> = config.banks.iter().map(|b| b.key.as_str()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), config.banks.len());
    }

    #[test]
    fn test_load_from_file_drops_unknown_allowlist() {
        let json = r#"{
            "banks": [{"key": "HALKBANK", "name": "Halkbank", "domains": ["halkbank.com.tr"]}],
            "ocr_allowlist": ["HALKBANK", "NOPE"],
            "name_markers": [{"key": "GHOST", "markers": ["ghost"]}],
            "variant_rules": [{
                "bank_key": "HALKBANK",
                "arms": [{"variant": "FAST", "markers": [{"kind": "word", "text": "fast"}]}]
            }]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = DetectionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.ocr_allowlist, vec!["HALKBANK".to_string()]);
        assert!(config.name_markers.is_empty());
        assert_eq!(config.variant_rules[0].fallback_variant, "UNKNOWN");
        assert_eq!(config.variant_rules[0].arms[0].key, None);
    }

    #[test]
    fn test_load_from_file_rejects_empty_banks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"banks": []}"#).unwrap();
        assert!(DetectionConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.text_pages, 2);
        assert!(!config.ocr.enabled);
        assert_eq!(config.ocr.provider, "tesseract");
        assert_eq!(config.ocr.dpi, 350);
        assert_eq!(config.ocr.lang, "tur+eng");
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn test_server_config_overrides() {
        let vars: HashMap<&str, &str> = [
            ("USE_OCR", "1"),
            ("OCR_PROVIDER", "docling"),
            ("OCR_DPI", "not-a-number"),
            ("TEXT_PAGES", "3"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(config.ocr.enabled);
        assert_eq!(config.ocr.provider, "docling");
        assert_eq!(config.ocr.dpi, 350);
        assert_eq!(config.text_pages, 3);
    }

    #[test]
    fn test_upload_limit_out_of_range_falls_back() {
        let huge = usize::MAX.to_string();
        let config = ServerConfig::from_lookup(|k| (k == "MAX_UPLOAD_MB").then(|| huge.clone()));
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);

        let config = ServerConfig::from_lookup(|k| (k == "MAX_UPLOAD_MB").then(|| "4".to_string()));
        assert_eq!(config.max_upload_bytes, 4 * 1024 * 1024);
    }
}
