//! Statements: the atomic, append-only unit of entity data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{Model, PropertyType, Schema, BASE_PROP};

/// One property value of one entity, as asserted by one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Stable hash over dataset, entity, property, value and external flag.
    pub id: String,
    pub entity_id: String,
    /// Cluster id at write time. Readers always re-resolve.
    pub canonical_id: String,
    pub prop: String,
    pub prop_type: PropertyType,
    pub schema: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Enrichment data that is only visible to views created with
    /// `external = true`.
    #[serde(default)]
    pub external: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Statement {
    /// Computes the stable statement id.
    #[must_use]
    pub fn make_id(dataset: &str, entity_id: &str, prop: &str, value: &str, external: bool) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [dataset, entity_id, prop, value] {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1f");
        }
        if external {
            hasher.update(b"ext");
        }
        let hash = hasher.finalize().to_hex();
        hash.as_str()[..40].to_string()
    }

    /// The statement that marks an entity's existence in a dataset.
    #[must_use]
    pub fn base(entity_id: &str, schema: &str, dataset: &str) -> Self {
        Self::raw(entity_id, BASE_PROP, PropertyType::String, schema, entity_id, dataset)
    }

    /// A property statement, with the value cleaned by the property type.
    pub fn for_property(
        entity_id: &str,
        schema: &Schema,
        prop: &str,
        value: &str,
        dataset: &str,
    ) -> Result<Self, ValidationError> {
        let property = schema.get_property(prop).ok_or_else(|| ValidationError::UnknownProperty {
            schema: schema.name().to_string(),
            prop: prop.to_string(),
        })?;
        let cleaned = property.prop_type.clean(value).ok_or_else(|| ValidationError::InvalidValue {
            schema: schema.name().to_string(),
            prop: prop.to_string(),
            prop_type: property.prop_type.to_string(),
            value: value.to_string(),
        })?;
        let mut stmt = Self::raw(entity_id, prop, property.prop_type, schema.name(), &cleaned, dataset);
        if cleaned != value {
            stmt.original_value = Some(value.to_string());
        }
        Ok(stmt)
    }

    fn raw(
        entity_id: &str,
        prop: &str,
        prop_type: PropertyType,
        schema: &str,
        value: &str,
        dataset: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::make_id(dataset, entity_id, prop, value, false),
            entity_id: entity_id.to_string(),
            canonical_id: entity_id.to_string(),
            prop: prop.to_string(),
            prop_type,
            schema: schema.to_string(),
            value: value.to_string(),
            original_value: None,
            dataset: dataset.to_string(),
            lang: None,
            external: false,
            first_seen: now,
            last_seen: now,
        }
    }

    #[must_use]
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Marks the statement as external enrichment data.
    #[must_use]
    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self.id = Self::make_id(&self.dataset, &self.entity_id, &self.prop, &self.value, external);
        self
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.prop == BASE_PROP
    }

    /// Checks the statement against the model before it is stored.
    pub fn validate(&self, model: &Model) -> Result<(), ValidationError> {
        if self.entity_id.trim().is_empty() || self.entity_id.chars().any(char::is_control) {
            return Err(ValidationError::InvalidIdentifier {
                value: self.entity_id.clone(),
            });
        }
        let schema = model.require(&self.schema)?;
        if self.is_base() {
            return Ok(());
        }
        let property = schema.get_property(&self.prop).ok_or_else(|| ValidationError::UnknownProperty {
            schema: self.schema.clone(),
            prop: self.prop.clone(),
        })?;
        if property.stub || property.prop_type != self.prop_type || property.prop_type.clean(&self.value).is_none() {
            return Err(ValidationError::InvalidValue {
                schema: self.schema.clone(),
                prop: self.prop.clone(),
                prop_type: property.prop_type.to_string(),
                value: self.value.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_and_sensitive() {
        let a = Statement::make_id("ds", "e1", "name", "Acme", false);
        assert_eq!(a, Statement::make_id("ds", "e1", "name", "Acme", false));
        assert_ne!(a, Statement::make_id("ds", "e1", "name", "Acme", true));
        assert_ne!(a, Statement::make_id("ds2", "e1", "name", "Acme", false));
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_for_property_cleans_value() {
        let model = Model::builtin();
        let person = model.get("Person").unwrap();
        let stmt = Statement::for_property("p1", person, "nationality", "DE", "ds").unwrap();
        assert_eq!(stmt.value, "de");
        assert_eq!(stmt.original_value.as_deref(), Some("DE"));
        assert_eq!(stmt.prop_type, PropertyType::Country);
    }

    #[test]
    fn test_for_property_rejects_invalid() {
        let model = Model::builtin();
        let person = model.get("Person").unwrap();
        assert!(matches!(
            Statement::for_property("p1", person, "birthDate", "last tuesday", "ds"),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            Statement::for_property("p1", person, "capital", "100", "ds"),
            Err(ValidationError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_stub_and_unknown_schema() {
        let model = Model::builtin();
        let mut stmt = Statement::base("c1", "Company", "ds");
        assert!(stmt.validate(&model).is_ok());

        stmt.schema = "Spaceship".to_string();
        assert!(stmt.validate(&model).is_err());

        let company = model.get("Company").unwrap();
        let mut stub = Statement::for_property("c1", company, "name", "Acme", "ds").unwrap();
        stub.prop = "paymentsMade".to_string();
        stub.prop_type = PropertyType::Entity;
        assert!(stub.validate(&model).is_err());
    }

    #[test]
    fn test_external_changes_id() {
        let stmt = Statement::base("e1", "Person", "ds");
        let ext = stmt.clone().external(true);
        assert!(ext.external);
        assert_ne!(stmt.id, ext.id);
    }
}
