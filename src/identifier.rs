//! Entity identifiers and resolver-minted canonical ids.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Prefix of ids minted by the resolver for merged clusters.
pub const CANONICAL_PREFIX: &str = "NK-";

/// An entity id as seen by the resolver.
///
/// Ordering puts resolver-minted canonical ids above source ids, then falls
/// back to lexicographic order, so the maximum of a cluster is always its
/// canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Creates an identifier, rejecting empty ids and control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() || id.chars().any(char::is_control) {
            return Err(ValidationError::InvalidIdentifier { value: id });
        }
        Ok(Self(id))
    }

    /// Mints a fresh canonical id.
    #[must_use]
    pub fn make() -> Self {
        Self(format!("{CANONICAL_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// True if this id was minted by the resolver.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.0.starts_with(CANONICAL_PREFIX)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the id.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.is_canonical()
            .cmp(&other.is_canonical())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ids_sort_last() {
        let minted = Identifier::make();
        let source = Identifier::from("zzz-source");
        assert!(minted.is_canonical());
        assert!(!source.is_canonical());
        assert!(minted > source);
        assert_eq!(std::cmp::max(source.clone(), minted.clone()), minted);
    }

    #[test]
    fn test_source_ids_sort_lexicographically() {
        assert!(Identifier::from("a") < Identifier::from("b"));
    }

    #[test]
    fn test_rejects_empty_and_control_chars() {
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("   ").is_err());
        assert!(Identifier::new("a\0b").is_err());
        assert!(Identifier::new("ok-1").is_ok());
    }

    #[test]
    fn test_minted_ids_are_unique() {
        assert_ne!(Identifier::make(), Identifier::make());
    }
}
