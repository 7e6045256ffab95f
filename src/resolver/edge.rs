use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::judgement::Judgement;

/// Key of an edge: `(source, target)` with `target` the greater id.
pub type EdgeKey = (Identifier, Identifier);

pub(crate) fn edge_key(left: &Identifier, right: &Identifier) -> EdgeKey {
    if left > right {
        (right.clone(), left.clone())
    } else {
        (left.clone(), right.clone())
    }
}

/// A recorded judgement between two ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// The lower of the two ids in [`Identifier`] order.
    pub source: Identifier,
    /// The greater of the two ids.
    pub target: Identifier,
    /// The decision, or `NoJudgement` for a suggestion.
    pub judgement: Judgement,
    /// Match score of the pair, when it came from scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Who made the decision; xref runs record their configured user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// When the judgement was made; replay and compaction keep it.
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// An edge between two ids in either order, stamped now.
    #[must_use]
    pub fn new(left: Identifier, right: Identifier, judgement: Judgement) -> Self {
        let (source, target) = if left > right { (right, left) } else { (left, right) };
        Self {
            source,
            target,
            judgement,
            score: None,
            user: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the deciding user.
    #[must_use]
    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(str::to_string);
        self
    }

    /// Sets the pair's score.
    #[must_use]
    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    /// The `(source, target)` key of this edge.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        (self.source.clone(), self.target.clone())
    }

    /// The other end of the edge.
    #[must_use]
    pub fn other(&self, id: &Identifier) -> &Identifier {
        if &self.source == id {
            &self.target
        } else {
            &self.source
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_greater_id() {
        let edge = Edge::new("b".into(), "a".into(), Judgement::Negative);
        assert_eq!(edge.source, "a");
        assert_eq!(edge.target, "b");
        assert_eq!(edge.key(), edge_key(&"b".into(), &"a".into()));
        assert_eq!(edge.other(&"a".into()), &Identifier::from("b"));
    }

    #[test]
    fn test_canonical_is_always_target() {
        let nk = Identifier::make();
        let edge = Edge::new(nk.clone(), "zzz".into(), Judgement::Positive);
        assert_eq!(edge.target, nk);
    }
}
