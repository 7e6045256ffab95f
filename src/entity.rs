//! Composite entities assembled from statements.
//!
//! A [`CompositeEntity`] is the read-side view of one resolver cluster: the
//! union of every statement whose entity id resolves to the same canonical
//! id, typed by the most specific schema among them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{Model, Property, PropertyType, Schema};
use crate::statement::Statement;
use crate::text;

/// Plain serialized form of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: Option<String>,
    pub schema: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub referents: Vec<String>,
}

/// An entity assembled from one or more source entities' statements.
#[derive(Debug, Clone)]
pub struct CompositeEntity {
    id: Option<String>,
    schema: Arc<Schema>,
    statements: Vec<Statement>,
    /// Datasets that contributed statements.
    pub datasets: BTreeSet<String>,
    /// Source ids merged into this entity (excluding its own id).
    pub referents: BTreeSet<String>,
    caption: OnceLock<String>,
}

impl CompositeEntity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new(schema: Arc<Schema>, id: Option<String>) -> Self {
        Self {
            id,
            schema,
            statements: Vec::new(),
            datasets: BTreeSet::new(),
            referents: BTreeSet::new(),
            caption: OnceLock::new(),
        }
    }

    /// Assembles an entity from statements sharing one canonical id.
    ///
    /// Returns `Ok(None)` for an empty statement list.
    pub fn from_statements(
        model: &Model,
        statements: Vec<Statement>,
    ) -> Result<Option<Self>, ValidationError> {
        let Some(first) = statements.first() else {
            return Ok(None);
        };
        let mut schema = model.require(&first.schema)?;
        let id = first.canonical_id.clone();

        let mut datasets = BTreeSet::new();
        let mut referents = BTreeSet::new();
        for stmt in &statements {
            if stmt.schema != schema.name() {
                schema = model.common_schema(schema.name(), &stmt.schema)?;
            }
            datasets.insert(stmt.dataset.clone());
            if stmt.entity_id != id {
                referents.insert(stmt.entity_id.clone());
            }
        }

        let mut seen = BTreeSet::new();
        let statements = statements
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();

        Ok(Some(Self {
            id: Some(id),
            schema,
            statements,
            datasets,
            referents,
            caption: OnceLock::new(),
        }))
    }

    /// Builds an entity from its serialized form, attributing every value to
    /// `dataset`.
    pub fn from_data(model: &Model, dataset: &str, data: &EntityData) -> Result<Self, ValidationError> {
        let schema = model.require(&data.schema)?;
        let id = data.id.clone().ok_or(ValidationError::MissingId)?;
        let mut entity = Self::new(schema, Some(id.clone()));
        entity.statements.push(Statement::base(&id, &data.schema, dataset));
        entity.datasets.insert(dataset.to_string());
        for (prop, values) in &data.properties {
            for value in values {
                entity.add(prop, value, dataset)?;
            }
        }
        entity.datasets.extend(data.datasets.iter().cloned());
        entity.referents.extend(data.referents.iter().filter(|r| **r != id).cloned());
        Ok(entity)
    }

    #[must_use]
    pub fn to_data(&self) -> EntityData {
        EntityData {
            id: self.id.clone(),
            schema: self.schema.name().to_string(),
            properties: self.properties(),
            caption: Some(self.caption().to_string()),
            datasets: self.datasets.iter().cloned().collect(),
            referents: self.referents.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    #[must_use]
    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    /// Distinct values of a property, in insertion order.
    #[must_use]
    pub fn get(&self, prop: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for stmt in &self.statements {
            if stmt.prop == prop && !stmt.is_base() && !out.contains(&stmt.value.as_str()) {
                out.push(&stmt.value);
            }
        }
        out
    }

    #[must_use]
    pub fn has(&self, prop: &str) -> bool {
        self.statements.iter().any(|s| s.prop == prop && !s.is_base())
    }

    /// All property values grouped by property name.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, Vec<String>> {
        let mut props: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stmt in self.statements.iter().filter(|s| !s.is_base()) {
            let values = props.entry(stmt.prop.clone()).or_default();
            if !values.contains(&stmt.value) {
                values.push(stmt.value.clone());
            }
        }
        props
    }

    /// Every (property, value) pair the schema knows about.
    pub fn itervalues(&self) -> impl Iterator<Item = (&Property, &str)> {
        self.statements.iter().filter_map(move |stmt| {
            if stmt.is_base() {
                return None;
            }
            let prop = self.schema.get_property(&stmt.prop)?;
            Some((prop, stmt.value.as_str()))
        })
    }

    /// Distinct values across all properties of one type.
    #[must_use]
    pub fn get_type_values(&self, prop_type: PropertyType) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (prop, value) in self.itervalues() {
            if prop.prop_type == prop_type && !out.contains(&value) {
                out.push(value);
            }
        }
        out
    }

    /// Adds a cleaned property value attributed to `dataset`.
    pub fn add(&mut self, prop: &str, value: &str, dataset: &str) -> Result<(), ValidationError> {
        let id = self.id.as_deref().ok_or(ValidationError::MissingId)?;
        let mut stmt = Statement::for_property(id, &self.schema, prop, value, dataset)?;
        stmt.schema = self.schema.name().to_string();
        if !self.statements.iter().any(|s| s.id == stmt.id) {
            self.statements.push(stmt);
        }
        self.datasets.insert(dataset.to_string());
        self.caption = OnceLock::new();
        Ok(())
    }

    /// Adds an already-built statement.
    pub fn add_statement(&mut self, stmt: Statement) {
        self.datasets.insert(stmt.dataset.clone());
        if !self.statements.iter().any(|s| s.id == stmt.id) {
            self.statements.push(stmt);
        }
        self.caption = OnceLock::new();
    }

    /// Folds another entity into this one.
    pub fn merge(&mut self, other: CompositeEntity, model: &Model) -> Result<(), ValidationError> {
        self.schema = model.common_schema(self.schema.name(), other.schema.name())?;
        if let Some(other_id) = &other.id {
            if self.id.as_ref() != Some(other_id) {
                self.referents.insert(other_id.clone());
            }
        }
        self.referents.extend(other.referents);
        self.datasets.extend(other.datasets);
        for stmt in other.statements {
            if !self.statements.iter().any(|s| s.id == stmt.id) {
                self.statements.push(stmt);
            }
        }
        self.caption = OnceLock::new();
        Ok(())
    }

    /// Display label, computed once per assembled entity.
    pub fn caption(&self) -> &str {
        self.caption.get_or_init(|| self.pick_caption())
    }

    fn pick_caption(&self) -> String {
        let is_thing = self.schema.is_a("Thing");
        for prop in self.schema.caption() {
            let values = self.get(prop);
            if is_thing && values.len() > 1 {
                if let Some(name) = pick_name(&values) {
                    return name;
                }
            }
            if let Some(value) = values.first() {
                return (*value).to_string();
            }
        }
        self.schema.label().to_string()
    }
}

/// Picks the most central of several name variants: the one with the
/// highest summed similarity to all others.
#[must_use]
pub fn pick_name(names: &[&str]) -> Option<String> {
    let normalized: Vec<String> = names.iter().map(|n| text::normalize(n)).collect();
    let mut best: Option<(usize, f64)> = None;
    for (i, left) in normalized.iter().enumerate() {
        if left.is_empty() {
            continue;
        }
        let score: f64 = normalized
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, right)| strsim::normalized_levenshtein(left, right))
            .sum();
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| names[i].to_string())
}

impl PartialEq for CompositeEntity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.schema.name() == other.schema.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str) -> CompositeEntity {
        let model = Model::builtin();
        let mut e = CompositeEntity::new(model.get("Person").unwrap().clone(), Some(id.to_string()));
        e.add_statement(Statement::base(id, "Person", "test"));
        e
    }

    #[test]
    fn test_caption_falls_back_to_schema_label() {
        let e = person("p1");
        assert_eq!(e.caption(), "Person");
    }

    #[test]
    fn test_caption_uses_first_name_value() {
        let mut e = person("p1");
        e.add("name", "Jane Doe", "test").unwrap();
        assert_eq!(e.caption(), "Jane Doe");
    }

    #[test]
    fn test_caption_picks_central_name() {
        let mut e = person("p1");
        e.add("name", "Vladimir Putin", "test").unwrap();
        e.add("name", "Vladimir Vladimirovich Putin", "test").unwrap();
        e.add("name", "Wladimir Putin", "test").unwrap();
        assert_eq!(e.caption(), "Vladimir Putin");
    }

    #[test]
    fn test_pick_name_single() {
        assert_eq!(pick_name(&["Only"]), Some("Only".to_string()));
        assert_eq!(pick_name(&[]), None);
    }

    #[test]
    fn test_add_requires_id() {
        let model = Model::builtin();
        let mut e = CompositeEntity::new(model.get("Person").unwrap().clone(), None);
        assert!(matches!(e.add("name", "x", "test"), Err(ValidationError::MissingId)));
    }

    #[test]
    fn test_merge_narrows_schema_and_unions() {
        let model = Model::builtin();
        let mut legal = CompositeEntity::new(model.get("LegalEntity").unwrap().clone(), Some("a".into()));
        legal.add("name", "Acme", "one").unwrap();
        let mut company = CompositeEntity::new(model.get("Company").unwrap().clone(), Some("b".into()));
        company.add("name", "ACME Corp", "two").unwrap();

        legal.merge(company, &model).unwrap();
        assert_eq!(legal.schema().name(), "Company");
        assert!(legal.referents.contains("b"));
        assert_eq!(legal.datasets.len(), 2);
        assert_eq!(legal.get("name").len(), 2);
    }

    #[test]
    fn test_merge_incompatible_fails() {
        let model = Model::builtin();
        let mut p = person("p1");
        let c = CompositeEntity::new(model.get("Company").unwrap().clone(), Some("c1".into()));
        assert!(p.merge(c, &model).is_err());
    }

    #[test]
    fn test_from_statements_picks_common_schema() {
        let model = Model::builtin();
        let mut a = Statement::base("a", "LegalEntity", "one");
        a.canonical_id = "NK-x".to_string();
        let mut b = Statement::base("b", "Company", "two");
        b.canonical_id = "NK-x".to_string();
        let e = CompositeEntity::from_statements(&model, vec![a, b]).unwrap().unwrap();
        assert_eq!(e.id(), Some("NK-x"));
        assert_eq!(e.schema().name(), "Company");
        assert_eq!(e.referents.len(), 2);
        assert!(CompositeEntity::from_statements(&model, vec![]).unwrap().is_none());
    }

    #[test]
    fn test_data_roundtrip_keeps_values() {
        let model = Model::builtin();
        let mut e = person("p1");
        e.add("name", "Jane Doe", "test").unwrap();
        e.add("birthDate", "1980-01-02", "test").unwrap();
        let data = e.to_data();
        assert_eq!(data.caption.as_deref(), Some("Jane Doe"));

        let back = CompositeEntity::from_data(&model, "test", &data).unwrap();
        assert_eq!(back.get("birthDate"), vec!["1980-01-02"]);
        assert_eq!(back.schema().name(), "Person");
    }
}
