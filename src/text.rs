//! Text normalization shared by captions, the index and the matchers.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Decomposes, strips diacritics and lowercases.
#[must_use]
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Folds and reduces everything that is not alphanumeric to single spaces.
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = fold(text)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Name tokens: normalized words, in order.
#[must_use]
pub fn name_tokens(text: &str) -> Vec<String> {
    normalize(text).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

/// Identifier form: folded alphanumerics only, uppercased.
#[must_use]
pub fn clean_identifier(text: &str) -> String {
    fold(text)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_accents() {
        assert_eq!(fold("Müller Ångström"), "muller angstrom");
    }

    #[test]
    fn test_normalize_collapses_punctuation() {
        assert_eq!(normalize("  ACME, Inc.  (Panama) "), "acme inc panama");
        assert_eq!(name_tokens("Jean-Luc Picard"), vec!["jean", "luc", "picard"]);
    }

    #[test]
    fn test_clean_identifier() {
        assert_eq!(clean_identifier("e-137 332"), "E137332");
    }
}
