//! Schemata and their properties.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::PropertyType;

/// Serialized form of a property, as found in model definition files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub prop_type: PropertyType,
    /// Target schema for entity-typed properties.
    #[serde(default)]
    pub range: Option<String>,
    /// Name of the stub property added to the range schema.
    #[serde(default)]
    pub reverse: Option<String>,
}

/// Serialized form of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub matchable: bool,
    #[serde(default)]
    pub caption: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
}

/// A resolved property, owned by the schema that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    /// Declaring schema.
    pub schema: String,
    pub name: String,
    pub label: String,
    pub prop_type: PropertyType,
    pub range: Option<String>,
    pub reverse: Option<String>,
    /// True for reverse properties generated from an entity reference.
    /// Stubs are never stored; they describe inbound edges.
    pub stub: bool,
}

impl Property {
    /// `Schema:name`.
    #[must_use]
    pub fn qname(&self) -> String {
        format!("{}:{}", self.schema, self.name)
    }

    #[must_use]
    pub const fn matchable(&self) -> bool {
        self.prop_type.matchable()
    }
}

/// A resolved schema with all inherited properties flattened in.
#[derive(Debug, Clone)]
pub struct Schema {
    pub(super) name: String,
    pub(super) label: String,
    pub(super) extends: Vec<String>,
    pub(super) matchable: bool,
    pub(super) caption: Vec<String>,
    pub(super) properties: BTreeMap<String, Property>,
    /// Every schema this one is (itself included).
    pub(super) ancestors: BTreeSet<String>,
}

impl Schema {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn extends(&self) -> &[String] {
        &self.extends
    }

    #[must_use]
    pub const fn matchable(&self) -> bool {
        self.matchable
    }

    /// Property names tried in order when picking a caption.
    #[must_use]
    pub fn caption(&self) -> &[String] {
        &self.caption
    }

    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// True if this schema is `name` or inherits from it.
    #[must_use]
    pub fn is_a(&self, name: &str) -> bool {
        self.ancestors.contains(name)
    }

    /// Whether entities of the two schemata may be compared at all.
    #[must_use]
    pub fn can_match(&self, other: &Schema) -> bool {
        if !self.matchable || !other.matchable {
            return false;
        }
        self.is_a(&other.name) || other.is_a(&self.name)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Schema {}
