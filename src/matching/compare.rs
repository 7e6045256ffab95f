//! Value comparison helpers shared by scoring algorithms.

use std::collections::BTreeSet;

use crate::entity::CompositeEntity;
use crate::model::PropertyType;
use crate::text;

/// True if both sides have values but none in common.
pub fn is_disjoint<T: Ord>(left: &BTreeSet<T>, right: &BTreeSet<T>) -> bool {
    !left.is_empty() && !right.is_empty() && left.is_disjoint(right)
}

/// True if both sides share at least one value.
pub fn has_overlap<T: Ord>(left: &BTreeSet<T>, right: &BTreeSet<T>) -> bool {
    !left.is_disjoint(right)
}

/// Best pairwise score between two value sets, 0.0 if either is empty.
pub fn compare_sets<F>(left: &BTreeSet<String>, right: &BTreeSet<String>, compare: F) -> f64
where
    F: Fn(&str, &str) -> f64,
{
    left.iter()
        .flat_map(|l| right.iter().map(move |r| (l, r)))
        .map(|(l, r)| compare(l, r))
        .fold(0.0, f64::max)
}

/// `1 - distance / max_len`, 0.0 for two empty strings.
pub fn levenshtein_ratio(left: &str, right: &str) -> f64 {
    let base = left.chars().count().max(right.chars().count());
    if base == 0 {
        return 0.0;
    }
    1.0 - strsim::levenshtein(left, right) as f64 / base as f64
}

/// Registration and tax number comparison.
///
/// Short numbers never count, containment is a full match (prefixes such
/// as a country letter are common), and otherwise only close edits score.
pub fn compare_identifiers(left: &str, right: &str) -> f64 {
    if left.chars().count().min(right.chars().count()) < 5 {
        return 0.0;
    }
    if left.contains(right) || right.contains(left) {
        return 1.0;
    }
    let ratio = levenshtein_ratio(left, right);
    if ratio > 0.7 {
        ratio
    } else {
        0.0
    }
}

/// Jaro-Winkler similarity of two names with their words sorted, so word
/// order does not matter.
pub fn name_similarity(left: &str, right: &str) -> f64 {
    let sort = |name: &str| {
        let mut tokens = text::name_tokens(name);
        tokens.sort();
        tokens.join(" ")
    };
    let (left, right) = (sort(left), sort(right));
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&left, &right)
}

/// Normalized name values of an entity.
pub fn names(entity: &CompositeEntity) -> BTreeSet<String> {
    entity
        .get_type_values(PropertyType::Name)
        .into_iter()
        .map(text::normalize)
        .filter(|n| !n.is_empty())
        .collect()
}

/// Cleaned identifier values of an entity.
pub fn identifiers(entity: &CompositeEntity) -> BTreeSet<String> {
    entity
        .get_type_values(PropertyType::Identifier)
        .into_iter()
        .map(text::clean_identifier)
        .filter(|i| !i.is_empty())
        .collect()
}

/// Country values of an entity, across all country-typed properties.
pub fn countries(entity: &CompositeEntity) -> BTreeSet<String> {
    entity
        .get_type_values(PropertyType::Country)
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Values of `prop` cut to a date prefix of `len` characters. Values less
/// precise than that are skipped.
pub fn dates_precision(entity: &CompositeEntity, prop: &str, len: usize) -> BTreeSet<String> {
    entity
        .get(prop)
        .into_iter()
        .filter_map(|d| d.get(..len))
        .map(str::to_string)
        .collect()
}

/// Year prefix length of an ISO date.
pub const YEAR: usize = 4;
/// Day prefix length of an ISO date.
pub const DAY: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_disjoint_needs_values_on_both_sides() {
        assert!(is_disjoint(&set(&["pa"]), &set(&["ru"])));
        assert!(!is_disjoint(&set(&["pa"]), &set(&[])));
        assert!(!is_disjoint(&set(&["pa", "ru"]), &set(&["ru"])));
        assert!(has_overlap(&set(&["pa", "ru"]), &set(&["ru"])));
    }

    #[test]
    fn test_compare_identifiers() {
        assert_eq!(compare_identifiers("1373", "1373"), 0.0);
        assert_eq!(compare_identifiers("137332", "E137332"), 1.0);
        assert_eq!(compare_identifiers("137332", "748745"), 0.0);
        let close = compare_identifiers("7740110399", "7740110398");
        assert!(close > 0.85 && close < 1.0);
    }

    #[test]
    fn test_name_similarity_ignores_order() {
        assert!((name_similarity("Putin, Vladimir", "vladimir putin") - 1.0).abs() < f64::EPSILON);
        assert!(name_similarity("Vladimir Putin", "Vladimir Pudin") > 0.9);
        assert_eq!(name_similarity("", "x"), 0.0);
    }

    #[test]
    fn test_compare_sets_takes_best() {
        let score = compare_sets(&set(&["a", "bb"]), &set(&["bb"]), |l, r| if l == r { 1.0 } else { 0.2 });
        assert_eq!(score, 1.0);
        assert_eq!(compare_sets(&set(&[]), &set(&["bb"]), |_, _| 1.0), 0.0);
    }
}
