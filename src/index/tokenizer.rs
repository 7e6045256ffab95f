//! Term extraction for the candidate index.
//!
//! Terms carry a one-letter type prefix so that, say, a year never matches
//! a house number:
//!
//! | Prefix | Source |
//! |--------|--------|
//! | `n:` | name words |
//! | `i:` | identifiers, emails and phone numbers, alphanumerics only |
//! | `c:` | country codes |
//! | `d:` | dates, plus their year |
//! | `a:` | address words |

use crate::entity::CompositeEntity;
use crate::model::PropertyType;
use crate::text;

const MIN_WORD_LEN: usize = 2;
const MIN_IDENTIFIER_LEN: usize = 3;

/// Terms for one property value, in order, with repeats.
pub fn value_tokens(prop_type: PropertyType, value: &str) -> Vec<String> {
    match prop_type {
        PropertyType::Name => words("n", value),
        PropertyType::Address => words("a", value),
        PropertyType::Identifier | PropertyType::Email | PropertyType::Phone => {
            let cleaned = text::clean_identifier(value);
            if cleaned.chars().count() < MIN_IDENTIFIER_LEN {
                Vec::new()
            } else {
                vec![format!("i:{cleaned}")]
            }
        }
        PropertyType::Country => {
            let code = text::normalize(value);
            if code.is_empty() {
                Vec::new()
            } else {
                vec![format!("c:{code}")]
            }
        }
        PropertyType::Date => {
            let value = value.trim();
            match value.get(..4) {
                Some(year) if value.len() > 4 => vec![format!("d:{year}"), format!("d:{value}")],
                Some(year) => vec![format!("d:{year}")],
                None => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

fn words(prefix: &str, value: &str) -> Vec<String> {
    text::name_tokens(value)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_WORD_LEN)
        .map(|t| format!("{prefix}:{t}"))
        .collect()
}

/// Terms for every matchable value of an entity.
pub fn entity_tokens(entity: &CompositeEntity) -> Vec<String> {
    let mut tokens = Vec::new();
    for (prop, value) in entity.itervalues() {
        if prop.matchable() {
            tokens.extend(value_tokens(prop.prop_type, value));
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_words_are_folded() {
        assert_eq!(value_tokens(PropertyType::Name, "José Ó Brien"), vec!["n:jose", "n:brien"]);
    }

    #[test]
    fn test_identifier_cleaning() {
        assert_eq!(value_tokens(PropertyType::Identifier, "e-137 332"), vec!["i:E137332"]);
        assert!(value_tokens(PropertyType::Identifier, "12").is_empty());
    }

    #[test]
    fn test_date_adds_year() {
        assert_eq!(value_tokens(PropertyType::Date, "1952-10-07"), vec!["d:1952", "d:1952-10-07"]);
        assert_eq!(value_tokens(PropertyType::Date, "1952"), vec!["d:1952"]);
    }

    #[test]
    fn test_unmatchable_types_yield_nothing() {
        assert!(value_tokens(PropertyType::Text, "long description").is_empty());
    }
}
