//! Boundary-aware domain and token matching over normalized text.

/// Characters that can continue a domain label or a word.
fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// True if `needle` occurs in `text` with no token character directly
/// before or after it. Every occurrence is checked.
pub fn contains_token(text: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    text.match_indices(needle).any(|(start, m)| {
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_token_char(c));
        let after_ok = text[start + m.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_token_char(c));
        before_ok && after_ok
    })
}

/// Test normalized text for a bank web domain.
///
/// `www.`, `https://`, trailing `/` and sub-domain suffixes (`.tr`) are all
/// accepted, while a domain embedded in a longer label is not:
/// `ing.com.tr` does not match `banking.com.tr`.
pub fn has_domain(text: &str, domain: &str) -> bool {
    contains_token(text, domain)
}
