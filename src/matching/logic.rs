//! Hand-tuned default scoring.

use std::collections::BTreeMap;

use super::compare::{self, DAY, YEAR};
use super::{FeatureDoc, MatchingResult, ScoringAlgorithm};
use crate::entity::CompositeEntity;

const NAME_LITERAL_MATCH: &str = "name_literal_match";
const NAME_SIMILARITY: &str = "name_similarity";
const IDENTIFIER_MATCH: &str = "identifier_match";
const COUNTRY_DISJOINT: &str = "country_disjoint";
const DOB_DAY_DISJOINT: &str = "dob_day_disjoint";
const DOB_YEAR_DISJOINT: &str = "dob_year_disjoint";
const IDENTIFIER_DISJOINT: &str = "identifier_disjoint";

/// Takes the strongest positive signal (exact name, similar name or shared
/// identifier) and subtracts penalties for contradicting facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicV1;

impl LogicV1 {
    fn coefficient(name: &str) -> f64 {
        match name {
            NAME_LITERAL_MATCH => 1.0,
            NAME_SIMILARITY => 0.9,
            IDENTIFIER_MATCH => 0.85,
            COUNTRY_DISJOINT => -0.2,
            DOB_DAY_DISJOINT => -0.15,
            DOB_YEAR_DISJOINT => -0.2,
            IDENTIFIER_DISJOINT => -0.2,
            _ => 0.0,
        }
    }
}

impl ScoringAlgorithm for LogicV1 {
    fn name(&self) -> &'static str {
        "logic-v1"
    }

    fn explain(&self) -> BTreeMap<&'static str, FeatureDoc> {
        [
            (NAME_LITERAL_MATCH, "Two entities have the same name, after normalization."),
            (NAME_SIMILARITY, "Best Jaro-Winkler similarity of any two names, word order ignored."),
            (IDENTIFIER_MATCH, "Two entities share an identifier."),
            (COUNTRY_DISJOINT, "Both entities are linked to different countries."),
            (DOB_DAY_DISJOINT, "Both persons have different birthdays."),
            (DOB_YEAR_DISJOINT, "Both persons are born in different years."),
            (
                IDENTIFIER_DISJOINT,
                "Two companies or organizations have different tax identifiers or registration numbers.",
            ),
        ]
        .into_iter()
        .map(|(name, description)| {
            (
                name,
                FeatureDoc {
                    description,
                    coefficient: Self::coefficient(name),
                },
            )
        })
        .collect()
    }

    fn compare(&self, left: &CompositeEntity, right: &CompositeEntity) -> MatchingResult {
        let mut result = MatchingResult::default();
        if !left.schema().can_match(right.schema()) {
            return result;
        }

        let (left_names, right_names) = (compare::names(left), compare::names(right));
        let literal = if compare::has_overlap(&left_names, &right_names) { 1.0 } else { 0.0 };
        let similarity = compare::compare_sets(&left_names, &right_names, compare::name_similarity);
        let (left_ids, right_ids) = (compare::identifiers(left), compare::identifiers(right));
        let id_match = if compare::has_overlap(&left_ids, &right_ids) { 1.0 } else { 0.0 };

        let mut score: f64 = 0.0;
        for (name, value) in [
            (NAME_LITERAL_MATCH, literal),
            (NAME_SIMILARITY, similarity),
            (IDENTIFIER_MATCH, id_match),
        ] {
            let weighted = value * Self::coefficient(name);
            result.features.insert(name.to_string(), weighted);
            score = score.max(weighted);
        }

        let mut penalty = |name: &str, applies: f64| {
            let weighted = applies * Self::coefficient(name);
            result.features.insert(name.to_string(), weighted);
            score += weighted;
        };

        let disjoint = |yes: bool| if yes { 1.0 } else { 0.0 };
        penalty(
            COUNTRY_DISJOINT,
            disjoint(compare::is_disjoint(&compare::countries(left), &compare::countries(right))),
        );
        penalty(
            DOB_DAY_DISJOINT,
            disjoint(compare::is_disjoint(
                &compare::dates_precision(left, "birthDate", DAY),
                &compare::dates_precision(right, "birthDate", DAY),
            )),
        );
        penalty(
            DOB_YEAR_DISJOINT,
            disjoint(compare::is_disjoint(
                &compare::dates_precision(left, "birthDate", YEAR),
                &compare::dates_precision(right, "birthDate", YEAR),
            )),
        );
        let organization = left.schema().is_a("Organization") || right.schema().is_a("Organization");
        let id_disjoint = if organization && !left_ids.is_empty() && !right_ids.is_empty() {
            1.0 - compare::compare_sets(&left_ids, &right_ids, compare::compare_identifiers)
        } else {
            0.0
        };
        penalty(IDENTIFIER_DISJOINT, id_disjoint);

        result.score = score.clamp(0.0, 1.0);
        result
    }
}
