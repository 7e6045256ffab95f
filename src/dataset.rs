//! Datasets: named sources of statements, optionally grouped into
//! collections.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A dataset or a collection of datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Dataset>,
}

impl Dataset {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            children: Vec::new(),
        }
    }

    /// Builds a collection containing the given datasets.
    #[must_use]
    pub fn collection(name: impl Into<String>, children: Vec<Dataset>) -> Self {
        Self {
            name: name.into(),
            title: None,
            children,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Names of this dataset and every descendant.
    #[must_use]
    pub fn scope_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        names.insert(self.name.clone());
        for child in &self.children {
            child.collect_names(names);
        }
    }

    /// True if `name` is this dataset or one of its descendants.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.name == name || self.children.iter().any(|c| c.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_scope() {
        let coll = Dataset::collection(
            "all",
            vec![Dataset::new("a"), Dataset::collection("nested", vec![Dataset::new("b")])],
        );
        let names = coll.scope_names();
        assert_eq!(names.len(), 4);
        assert!(coll.contains("b"));
        assert!(!coll.contains("c"));
    }
}
