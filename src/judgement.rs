//! Judgements recorded between pairs of entity ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The verdict on whether two ids refer to the same real-world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgement {
    /// Same entity. Positive edges are the only ones that merge clusters.
    Positive,
    /// Definitely different entities.
    Negative,
    /// A reviewer looked at the pair and could not decide.
    Unsure,
    /// No decision yet; edges with this judgement carry a suggestion score.
    NoJudgement,
}

impl Judgement {
    /// Returns the wire name of this judgement.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Unsure => "unsure",
            Self::NoJudgement => "no_judgement",
        }
    }

    /// True for judgements made by a person or an auto-merge, i.e. anything
    /// but [`Judgement::NoJudgement`].
    #[must_use]
    pub const fn is_decision(self) -> bool {
        !matches!(self, Self::NoJudgement)
    }

    /// Precedence used when several edges connect two clusters.
    pub(crate) const fn rank(self) -> u8 {
        match self {
            Self::Positive => 3,
            Self::Negative => 2,
            Self::Unsure => 1,
            Self::NoJudgement => 0,
        }
    }
}

impl fmt::Display for Judgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Judgement {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "unsure" => Ok(Self::Unsure),
            "no_judgement" => Ok(Self::NoJudgement),
            other => Err(ValidationError::InvalidValue {
                schema: "Edge".to_string(),
                prop: "judgement".to_string(),
                prop_type: "judgement".to_string(),
                value: other.to_string(),
            }),
        }
    }
}
