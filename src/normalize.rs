//! Text canonicalization for bank and variant matching.
//!
//! Pure functions, no I/O. Output is lowercase, Turkish-folded ASCII where
//! possible, with every whitespace run collapsed to a single space.

/// Combining dot above, left behind when `İ` is lowercased to `i̇`.
const COMBINING_DOT_ABOVE: char = '\u{0307}';

/// Normalize extracted PDF (or OCR) text for matching.
///
/// Idempotent: `normalize_text(&normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| *c != COMBINING_DOT_ABOVE)
        .map(fold_turkish)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_turkish(c: char) -> char {
    match c {
        'ı' => 'i',
        'ö' => 'o',
        'ü' => 'u',
        'ş' => 's',
        'ğ' => 'g',
        'ç' => 'c',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(
            normalize_text("  Visit\n www.Halkbank.COM.TR \t for\r\ndetails "),
            "visit www.halkbank.com.tr for details"
        );
    }

    #[test]
    fn test_turkish_letters() {
        assert_eq!(normalize_text("İŞLEM TARİHİ"), "islem tarihi");
        assert_eq!(normalize_text("Alıcı Adı Soyadı"), "alici adi soyadi");
        assert_eq!(normalize_text("GÖNDEREN KİŞİ"), "gonderen kisi");
        assert_eq!(normalize_text("Ödeme Ücreti Çağrı"), "odeme ucreti cagri");
    }

    #[test]
    fn test_non_breaking_spaces() {
        assert_eq!(normalize_text("Tutar\u{00a0}1.250,00\u{202f}TL"), "tutar 1.250,00 tl");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n\t "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "",
            "DENIZBANK A.Ş. FAST Transfer",
            "  İşlem\u{00a0}Tarihi:\n\n 12.03.2024 14:22:01 ",
            "i\u{0307} \u{0307} ı",
            "Sender Name\nJOHN DOE\nAmount 100 TRY",
            "تحويل KuveytTürk",
            "Straße ǅ ΣΑΣ",
        ];
        for s in samples {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once, "not idempotent for {:?}", s);
        }
    }
}
