//! Pairwise entity scoring.
//!
//! Xref treats scoring as a pluggable capability: anything implementing
//! [`ScoringAlgorithm`] can replace the index's coarse overlap score with a
//! feature-weighted one. [`LogicV1`] is the default.

pub mod compare;
mod logic;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::entity::CompositeEntity;

pub use logic::LogicV1;

/// A score in `[0, 1]` and the weighted feature values behind it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchingResult {
    pub score: f64,
    /// Feature name to weighted value. Penalties are negative.
    pub features: BTreeMap<String, f64>,
}

/// Documentation for one feature of an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureDoc {
    pub description: &'static str,
    /// Weight applied to the raw feature value.
    pub coefficient: f64,
}

/// A pairwise scoring algorithm.
pub trait ScoringAlgorithm: Send + Sync {
    /// Short stable name, recorded in logs.
    fn name(&self) -> &'static str;

    /// The features this algorithm computes.
    fn explain(&self) -> BTreeMap<&'static str, FeatureDoc>;

    /// Scores how likely `left` and `right` describe the same entity.
    fn compare(&self, left: &CompositeEntity, right: &CompositeEntity) -> MatchingResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::statement::Statement;

    fn entity(id: &str, schema: &str, props: &[(&str, &str)]) -> CompositeEntity {
        let model = Model::builtin();
        let mut e = CompositeEntity::new(model.get(schema).unwrap().clone(), Some(id.to_string()));
        e.add_statement(Statement::base(id, schema, "test"));
        for (prop, value) in props {
            e.add(prop, value, "test").unwrap();
        }
        e
    }

    #[test]
    fn test_explain_covers_features() {
        let docs = LogicV1.explain();
        let a = entity("a", "Company", &[("name", "Acme"), ("registrationNumber", "12345678")]);
        let b = entity("b", "Company", &[("name", "Acme"), ("registrationNumber", "87654321")]);
        let result = LogicV1.compare(&a, &b);
        for feature in result.features.keys() {
            assert!(docs.contains_key(feature.as_str()), "{feature} undocumented");
        }
        assert!(docs.values().any(|d| d.coefficient < 0.0));
    }

    #[test]
    fn test_unmatchable_schemata_score_zero() {
        let a = entity("a", "Person", &[("name", "Acme")]);
        let b = entity("b", "Company", &[("name", "Acme")]);
        assert_eq!(LogicV1.compare(&a, &b).score, 0.0);
    }
}
