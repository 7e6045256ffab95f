//! The ontology boundary: schemata, properties and value types.
//!
//! A [`Model`] is loaded from JSON schema definitions. Inheritance is
//! flattened at load time and every entity reference with a `reverse` name
//! produces a stub property on its range schema, so inbound edges can be
//! labelled when traversing the graph backwards.

mod schema;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use schema::{Property, PropertySpec, Schema, SchemaSpec};
pub use types::PropertyType;

use crate::error::ValidationError;

/// Name of the pseudo-property whose statement marks an entity's existence.
pub const BASE_PROP: &str = "id";

const BUILTIN_SCHEMATA: &str = r#"[
  {
    "name": "Thing",
    "caption": ["name"],
    "properties": {
      "name": {"type": "name", "label": "Name"},
      "alias": {"type": "name", "label": "Other name"},
      "previousName": {"type": "name", "label": "Previous name"},
      "country": {"type": "country", "label": "Country"},
      "notes": {"type": "text", "label": "Notes"},
      "sourceUrl": {"type": "url", "label": "Source link"},
      "address": {"type": "address", "label": "Address"},
      "addressEntity": {"type": "entity", "label": "Address", "range": "Address", "reverse": "things"}
    }
  },
  {
    "name": "LegalEntity",
    "label": "Legal entity",
    "extends": ["Thing"],
    "matchable": true,
    "properties": {
      "email": {"type": "email", "label": "E-Mail"},
      "phone": {"type": "phone", "label": "Phone"},
      "website": {"type": "url", "label": "Website"},
      "registrationNumber": {"type": "identifier", "label": "Registration number"},
      "taxNumber": {"type": "identifier", "label": "Tax number"},
      "idNumber": {"type": "identifier", "label": "ID number"},
      "incorporationDate": {"type": "date", "label": "Incorporation date"},
      "dissolutionDate": {"type": "date", "label": "Dissolution date"},
      "jurisdiction": {"type": "country", "label": "Jurisdiction"}
    }
  },
  {
    "name": "Person",
    "extends": ["LegalEntity"],
    "matchable": true,
    "properties": {
      "firstName": {"type": "name", "label": "First name"},
      "lastName": {"type": "name", "label": "Last name"},
      "birthDate": {"type": "date", "label": "Birth date"},
      "deathDate": {"type": "date", "label": "Death date"},
      "birthPlace": {"type": "string", "label": "Place of birth"},
      "nationality": {"type": "country", "label": "Nationality"},
      "passportNumber": {"type": "identifier", "label": "Passport number"}
    }
  },
  {
    "name": "Organization",
    "extends": ["LegalEntity"],
    "matchable": true,
    "properties": {
      "classification": {"type": "string", "label": "Classification"}
    }
  },
  {
    "name": "Company",
    "extends": ["Organization"],
    "matchable": true,
    "properties": {
      "capital": {"type": "number", "label": "Capital"},
      "leiCode": {"type": "identifier", "label": "LEI"}
    }
  },
  {
    "name": "Address",
    "extends": ["Thing"],
    "caption": ["full", "city"],
    "properties": {
      "full": {"type": "address", "label": "Full address"},
      "street": {"type": "string", "label": "Street address"},
      "city": {"type": "string", "label": "City"},
      "postalCode": {"type": "string", "label": "Postal code"}
    }
  },
  {
    "name": "Payment",
    "caption": ["purpose", "amount"],
    "properties": {
      "payer": {"type": "entity", "label": "Payer", "range": "LegalEntity", "reverse": "paymentsMade"},
      "beneficiary": {"type": "entity", "label": "Beneficiary", "range": "LegalEntity", "reverse": "paymentsReceived"},
      "amount": {"type": "number", "label": "Amount"},
      "currency": {"type": "string", "label": "Currency"},
      "date": {"type": "date", "label": "Date"},
      "purpose": {"type": "text", "label": "Purpose"}
    }
  },
  {
    "name": "Ownership",
    "caption": ["role", "percentage"],
    "properties": {
      "owner": {"type": "entity", "label": "Owner", "range": "LegalEntity", "reverse": "ownershipOwner"},
      "asset": {"type": "entity", "label": "Asset", "range": "Thing", "reverse": "ownershipAsset"},
      "percentage": {"type": "string", "label": "Percentage held"},
      "role": {"type": "string", "label": "Role"},
      "startDate": {"type": "date", "label": "Start date"}
    }
  },
  {
    "name": "Directorship",
    "caption": ["role"],
    "properties": {
      "director": {"type": "entity", "label": "Director", "range": "LegalEntity", "reverse": "directorshipDirector"},
      "organization": {"type": "entity", "label": "Organization", "range": "Organization", "reverse": "directorshipOrganization"},
      "role": {"type": "string", "label": "Role"},
      "startDate": {"type": "date", "label": "Start date"}
    }
  }
]"#;

/// A resolved set of schemata.
#[derive(Debug, Clone)]
pub struct Model {
    schemata: BTreeMap<String, Arc<Schema>>,
}

impl Model {
    /// Convenience constructor for the built-in model: people, companies,
    /// addresses and the relationship schemata between them.
    ///
    /// Every call parses a fresh model. Stores and views never reach for it
    /// themselves; they use the model handed to them in a
    /// [`StoreContext`](crate::storage::StoreContext), so callers share one
    /// by cloning the returned `Arc`.
    #[must_use]
    pub fn builtin() -> Arc<Model> {
        Arc::new(Self::from_json(BUILTIN_SCHEMATA).expect("built-in model is valid"))
    }

    /// Loads a model from a JSON array of schema definitions.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let specs: Vec<SchemaSpec> =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
                field: "model".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_specs(specs)
    }

    /// Resolves inheritance and reverse stubs.
    pub fn from_specs(specs: Vec<SchemaSpec>) -> Result<Self, ValidationError> {
        let specs: BTreeMap<String, SchemaSpec> =
            specs.into_iter().map(|s| (s.name.clone(), s)).collect();

        let mut stubs: BTreeMap<String, Vec<Property>> = BTreeMap::new();
        for spec in specs.values() {
            for (name, prop) in &spec.properties {
                if prop.prop_type != PropertyType::Entity {
                    continue;
                }
                let Some(range) = &prop.range else { continue };
                if !specs.contains_key(range) {
                    return Err(ValidationError::UnknownSchema { name: range.clone() });
                }
                let Some(reverse) = &prop.reverse else { continue };
                stubs.entry(range.clone()).or_default().push(Property {
                    schema: range.clone(),
                    name: reverse.clone(),
                    label: reverse.clone(),
                    prop_type: PropertyType::Entity,
                    range: Some(spec.name.clone()),
                    reverse: Some(name.clone()),
                    stub: true,
                });
            }
        }

        let mut resolved = BTreeMap::new();
        for name in specs.keys() {
            resolve(name, &specs, &stubs, &mut resolved, &mut Vec::new())?;
        }

        Ok(Self {
            schemata: resolved.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemata.get(name)
    }

    /// Like [`Model::get`], but unknown names are an error.
    pub fn require(&self, name: &str) -> Result<Arc<Schema>, ValidationError> {
        self.schemata
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownSchema { name: name.to_string() })
    }

    pub fn schemata(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemata.values()
    }

    /// The more specific of two schemata, if one inherits from the other.
    pub fn common_schema(&self, left: &str, right: &str) -> Result<Arc<Schema>, ValidationError> {
        let l = self.require(left)?;
        if left == right {
            return Ok(l);
        }
        let r = self.require(right)?;
        if l.is_a(right) {
            return Ok(l);
        }
        if r.is_a(left) {
            return Ok(r);
        }
        Err(ValidationError::IncompatibleSchemata {
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    /// The property seen from the other end of an entity reference.
    #[must_use]
    pub fn reverse_property(&self, prop: &Property) -> Option<&Property> {
        let range = self.schemata.get(prop.range.as_deref()?)?;
        range.get_property(prop.reverse.as_deref()?)
    }
}

fn resolve(
    name: &str,
    specs: &BTreeMap<String, SchemaSpec>,
    stubs: &BTreeMap<String, Vec<Property>>,
    resolved: &mut BTreeMap<String, Schema>,
    stack: &mut Vec<String>,
) -> Result<(), ValidationError> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    if stack.iter().any(|s| s == name) {
        return Err(ValidationError::InvalidConfig {
            field: "extends".to_string(),
            reason: format!("inheritance cycle through {name}"),
        });
    }
    let spec = specs
        .get(name)
        .ok_or_else(|| ValidationError::UnknownSchema { name: name.to_string() })?;

    stack.push(name.to_string());
    for parent in &spec.extends {
        resolve(parent, specs, stubs, resolved, stack)?;
    }
    stack.pop();

    let mut properties = BTreeMap::new();
    let mut ancestors = BTreeSet::from([name.to_string()]);
    let mut caption = spec.caption.clone();
    for parent in &spec.extends {
        let Some(parent) = resolved.get(parent) else { continue };
        properties.extend(parent.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        ancestors.extend(parent.ancestors.iter().cloned());
        if caption.is_empty() {
            caption = parent.caption.clone();
        }
    }
    for stub in stubs.get(name).into_iter().flatten() {
        properties.insert(stub.name.clone(), stub.clone());
    }
    for (prop_name, prop) in &spec.properties {
        properties.insert(
            prop_name.clone(),
            Property {
                schema: name.to_string(),
                name: prop_name.clone(),
                label: prop.label.clone().unwrap_or_else(|| prop_name.clone()),
                prop_type: prop.prop_type,
                range: prop.range.clone(),
                reverse: prop.reverse.clone(),
                stub: false,
            },
        );
    }

    resolved.insert(
        name.to_string(),
        Schema {
            name: name.to_string(),
            label: spec.label.clone().unwrap_or_else(|| name.to_string()),
            extends: spec.extends.clone(),
            matchable: spec.matchable,
            caption,
            properties,
            ancestors,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_inheritance() {
        let model = Model::builtin();
        let company = model.get("Company").unwrap();
        assert!(company.is_a("Organization"));
        assert!(company.is_a("LegalEntity"));
        assert!(company.is_a("Thing"));
        assert!(company.get_property("name").is_some());
        assert!(company.get_property("registrationNumber").is_some());
        assert_eq!(company.caption(), ["name".to_string()]);
    }

    #[test]
    fn test_builtin_models_are_independent() {
        let first = Model::builtin();
        let second = Model::builtin();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.get("Person"), second.get("Person"));
    }

    #[test]
    fn test_can_match() {
        let model = Model::builtin();
        let person = model.get("Person").unwrap();
        let company = model.get("Company").unwrap();
        let legal = model.get("LegalEntity").unwrap();
        let address = model.get("Address").unwrap();
        assert!(person.can_match(person));
        assert!(legal.can_match(company));
        assert!(company.can_match(legal));
        assert!(!person.can_match(company));
        assert!(!address.can_match(address));
    }

    #[test]
    fn test_reverse_stubs_are_inherited() {
        let model = Model::builtin();
        let company = model.get("Company").unwrap();
        let stub = company.get_property("paymentsMade").unwrap();
        assert!(stub.stub);
        assert_eq!(stub.range.as_deref(), Some("Payment"));

        let payer = model.get("Payment").unwrap().get_property("payer").unwrap();
        let reverse = model.reverse_property(payer).unwrap();
        assert_eq!(reverse.name, "paymentsMade");
    }

    #[test]
    fn test_common_schema() {
        let model = Model::builtin();
        assert_eq!(model.common_schema("LegalEntity", "Company").unwrap().name(), "Company");
        assert_eq!(model.common_schema("Person", "Person").unwrap().name(), "Person");
        assert!(model.common_schema("Person", "Company").is_err());
    }

    #[test]
    fn test_rejects_inheritance_cycle() {
        let json = r#"[
            {"name": "A", "extends": ["B"]},
            {"name": "B", "extends": ["A"]}
        ]"#;
        assert!(Model::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_unknown_range() {
        let json = r#"[{"name": "A", "properties": {"x": {"type": "entity", "range": "Nope"}}}]"#;
        assert!(matches!(
            Model::from_json(json),
            Err(ValidationError::UnknownSchema { .. })
        ));
    }
}
