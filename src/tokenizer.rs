//! Identifier-aware tokenization and lowercase term extraction (§4.1).

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|\d+|\S").expect("static regex"));

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static regex"));

/// Count of matches of "identifier | integer | single non-space character".
/// A cheap proxy for model token counts, used to bound chunk sizes.
pub fn estimate_tokens(text: &str) -> usize {
    TOKEN_RE.find_iter(text).count()
}

/// Lowercase identifier tokens of length > 1, in input order, not deduplicated.
pub fn normalize_terms(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    IDENT_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|tok| tok.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_counts_identifiers_and_punctuation() {
        assert_eq!(estimate_tokens("foo(bar, 42)"), 6);
    }

    #[test]
    fn normalize_terms_lowercases_and_drops_short_tokens() {
        assert_eq!(
            normalize_terms("Create_Post a x"),
            vec!["create_post".to_string()]
        );
    }

    #[test]
    fn normalize_terms_preserves_order_and_duplicates() {
        assert_eq!(
            normalize_terms("get get post"),
            vec!["get", "get", "post"]
        );
    }
}
