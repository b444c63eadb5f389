//! Receipt template fingerprinting.
//!
//! Masks the variable parts of a receipt (names, IBANs, dates, amounts) and
//! hashes what is left, so receipts printed from the same template share a
//! hash. Also flags text layers too short or too garbled to trust.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Lines starting with these carry per-transaction values.
const VARIABLE_LINE_PREFIXES: &[&str] = &[
    "sayin",
    "güvenli̇k",
    "guvenlik",
    "şube kodu/adi",
    "sube kodu/adi",
    "iban",
    "hesap numarasi",
    "hesap numarası",
    "vergi̇ dai̇resi̇",
    "vergi dairesi",
    "vergi̇ ki̇mli̇k no",
    "vergi kimlik no",
    "i̇şlem tari̇hi",
    "islem tarihi",
    "valör",
    "valor",
    "alacaklı şube",
    "alacakli sube",
    "alacaklı hesap",
    "alacakli hesap",
    "alacaklı iban",
    "alacakli iban",
    "alacaklı adı soyadı",
    "alacakli adi soyadi",
    "alacaklı vergi",
    "alacakli vergi",
    "komi̇syon",
    "komisyon",
    "havale tutarı",
    "havale tutari",
    "hesabınızdan",
    "hesabinizdan",
];

const MIN_TEXT_CHARS: usize = 300;
const MAX_WEIRD_RATIO: f64 = 0.25;
const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Anomaly {
    Ok,
    LowText,
    WeirdEncoding,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub raw_len: usize,
    pub anomaly: Vec<Anomaly>,
    pub template_hash: String,
    pub norm_preview: String,
}

struct Patterns {
    timestamp_line: Regex,
    digits: Regex,
    punctuation: Regex,
    spaces: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        timestamp_line: Regex::new(r"^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}[- ]\d{1,2}:\d{2}:\d{2}\b")
            .expect("valid regex"),
        digits: Regex::new(r"\d+").expect("valid regex"),
        punctuation: Regex::new(r"[^\w\s#]").expect("valid regex"),
        spaces: Regex::new(r"\s+").expect("valid regex"),
    })
}

/// Receipt text with variable content masked, one template line per line.
pub fn normalize_for_template(text: &str) -> String {
    let p = patterns();
    let lowered = text.to_lowercase().replace('\u{00a0}', " ");

    lowered
        .lines()
        .map(|line| p.spaces.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| !VARIABLE_LINE_PREFIXES.iter().any(|pre| line.starts_with(pre)))
        .filter(|line| !p.timestamp_line.is_match(line))
        .filter_map(|line| {
            let masked = p.digits.replace_all(&line, "#");
            let masked = p.punctuation.replace_all(&masked, " ");
            let masked = p.spaces.replace_all(&masked, " ").trim().to_string();
            (!masked.is_empty()).then_some(masked)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn anomaly_flags(raw_text: &str) -> Vec<Anomaly> {
    let t = raw_text.trim();
    let len = t.chars().count();
    let mut flags = Vec::new();

    if len < MIN_TEXT_CHARS {
        flags.push(Anomaly::LowText);
    }
    let weird = t
        .chars()
        .filter(|c| !(c.is_alphanumeric() || *c == '_' || c.is_whitespace()))
        .count();
    if weird as f64 / len.max(1) as f64 > MAX_WEIRD_RATIO {
        flags.push(Anomaly::WeirdEncoding);
    }
    if flags.is_empty() {
        flags.push(Anomaly::Ok);
    }
    flags
}

pub fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(raw_text: &str) -> Fingerprint {
    let norm = normalize_for_template(raw_text);
    Fingerprint {
        raw_len: raw_text.chars().count(),
        anomaly: anomaly_flags(raw_text),
        template_hash: sha256_hex(&norm),
        norm_preview: norm.chars().take(PREVIEW_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT_A: &str = "DENİZBANK A.Ş.\nSAYIN AHMET YILMAZ\nIBAN TR12 0006 4000 0011 2345 6789 01\n12/03/2024 14:22:01 FAST\nTutar 1.250,00 TL\nwww.denizbank.com";
    const RECEIPT_B: &str = "DENİZBANK A.Ş.\nSAYIN AYŞE KAYA\nIBAN TR99 0001 0000 0099 8765 4321 00\n01/11/2023 09:05:44 FAST\nTutar 2.400,50 TL\nwww.denizbank.com";

    #[test]
    fn test_template_masks_variable_content() {
        let norm = normalize_for_template(RECEIPT_A);
        assert!(!norm.contains("ahmet"));
        assert!(!norm.contains("tr12"));
        assert!(!norm.contains("14"));
        assert!(norm.contains("tutar # # # tl"));
        assert!(norm.contains("www denizbank com"));
    }

    #[test]
    fn test_same_template_same_hash() {
        assert_eq!(fingerprint(RECEIPT_A).template_hash, fingerprint(RECEIPT_B).template_hash);
        assert_ne!(
            fingerprint(RECEIPT_A).template_hash,
            fingerprint("Ziraat Bankası\nHavale Dekontu").template_hash
        );
    }

    #[test]
    fn test_low_text_flag() {
        assert_eq!(anomaly_flags("short receipt"), vec![Anomaly::LowText]);
        assert_eq!(anomaly_flags(&"word ".repeat(100)), vec![Anomaly::Ok]);
    }

    #[test]
    fn test_weird_encoding_flag() {
        let garbled = "%$#@!&*".repeat(60);
        assert_eq!(anomaly_flags(&garbled), vec![Anomaly::WeirdEncoding]);
        assert_eq!(anomaly_flags(""), vec![Anomaly::LowText]);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_serialization() {
        let fp = fingerprint("x");
        let json = serde_json::to_value(&fp).unwrap();
        assert_eq!(json["anomaly"][0], "LOW_TEXT");
        assert_eq!(json["raw_len"], 1);
    }
}
