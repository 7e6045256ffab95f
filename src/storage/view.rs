//! Entity assembly shared by every backend.
//!
//! Backends only need to answer three raw questions (see
//! [`StatementSource`]); [`StatementView`] turns those answers into
//! composite entities by following the resolver at read time, so a merge is
//! visible to readers before any statement is re-keyed.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use super::traits::{StorageError, View};
use crate::dataset::Dataset;
use crate::entity::CompositeEntity;
use crate::identifier::Identifier;
use crate::model::{Model, Property, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

/// Raw statement access provided by a backend.
pub trait StatementSource {
    /// All statements stored under `entity_id`.
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError>;

    /// Entity ids with an entity-typed statement whose value is `entity_id`.
    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError>;

    /// Up to `limit` distinct stored entity ids greater than `after`, in
    /// ascending order.
    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError>;
}

impl<T: StatementSource + ?Sized> StatementSource for &T {
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        (**self).statements(entity_id)
    }

    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        (**self).referencing(entity_id)
    }

    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError> {
        (**self).entity_ids(after, limit)
    }
}

/// A [`View`] over any [`StatementSource`].
pub struct StatementView<S> {
    source: S,
    scope: Dataset,
    scope_names: BTreeSet<String>,
    external: bool,
    model: Arc<Model>,
    resolver: Arc<Resolver>,
    page_size: usize,
}

impl<S: StatementSource> StatementView<S> {
    pub fn new(
        source: S,
        scope: &Dataset,
        external: bool,
        model: Arc<Model>,
        resolver: Arc<Resolver>,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            scope_names: scope.scope_names(),
            scope: scope.clone(),
            external,
            model,
            resolver,
            page_size: page_size.max(1),
        }
    }

    fn visible(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let mut statements = self.source.statements(entity_id)?;
        statements.retain(|s| self.scope_names.contains(&s.dataset) && (self.external || !s.external));
        Ok(statements)
    }

    fn assemble(
        &self,
        canonical: &Identifier,
        mut statements: Vec<Statement>,
    ) -> Result<Option<CompositeEntity>, StorageError> {
        for stmt in &mut statements {
            stmt.canonical_id = canonical.to_string();
            if stmt.prop_type == PropertyType::Entity {
                stmt.value = self.resolver.get_canonical(&stmt.value).into_string();
            }
        }
        let Some(mut entity) = CompositeEntity::from_statements(&self.model, statements)? else {
            return Ok(None);
        };
        // Merged ids without visible statements still belong to the entity.
        entity.referents.extend(
            self.resolver
                .get_referents(canonical.as_str())
                .into_iter()
                .map(Identifier::into_string),
        );
        Ok(Some(entity))
    }
}

impl<S: StatementSource> View for StatementView<S> {
    fn scope(&self) -> &Dataset {
        &self.scope
    }

    fn external(&self) -> bool {
        self.external
    }

    fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    fn has_entity(&self, id: &str) -> Result<bool, StorageError> {
        if self.resolver.get_canonical(id) != id {
            return Ok(false);
        }
        for member in self.resolver.connected(id) {
            if !self.visible(member.as_str())?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_entity(&self, id: &str) -> Result<Option<CompositeEntity>, StorageError> {
        let canonical = self.resolver.get_canonical(id);
        if canonical != id {
            return Ok(None);
        }
        let mut statements = Vec::new();
        for member in self.resolver.connected(id) {
            statements.extend(self.visible(member.as_str())?);
        }
        self.assemble(&canonical, statements)
    }

    fn get_inverted(&self, id: &str) -> Result<Vec<(Property, CompositeEntity)>, StorageError> {
        let canonical = self.resolver.get_canonical(id);
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for member in self.resolver.connected(canonical.as_str()) {
            for referrer in self.source.referencing(member.as_str())? {
                let referrer = self.resolver.get_canonical(&referrer);
                if referrer == canonical || !seen.insert(referrer.clone()) {
                    continue;
                }
                let Some(entity) = self.get_entity(referrer.as_str())? else {
                    continue;
                };
                let mut props = BTreeSet::new();
                for stmt in entity.statements() {
                    if stmt.prop_type != PropertyType::Entity || stmt.value != canonical.as_str() {
                        continue;
                    }
                    let Some(prop) = entity.schema().get_property(&stmt.prop) else {
                        continue;
                    };
                    if !props.insert(prop.name.clone()) {
                        continue;
                    }
                    if let Some(reverse) = self.model.reverse_property(prop) {
                        out.push((reverse.clone(), entity.clone()));
                    }
                }
            }
        }
        Ok(out)
    }

    fn entities(&self) -> Box<dyn Iterator<Item = Result<CompositeEntity, StorageError>> + '_> {
        Box::new(EntityCursor {
            view: self,
            after: None,
            page: VecDeque::new(),
            seen: HashSet::new(),
            exhausted: false,
        })
    }
}

/// Pages through sorted entity ids, yielding one entity per cluster.
struct EntityCursor<'a, S> {
    view: &'a StatementView<S>,
    after: Option<String>,
    page: VecDeque<String>,
    seen: HashSet<Identifier>,
    exhausted: bool,
}

impl<S: StatementSource> Iterator for EntityCursor<'_, S> {
    type Item = Result<CompositeEntity, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page.is_empty() {
                if self.exhausted {
                    return None;
                }
                let limit = self.view.page_size;
                match self.view.source.entity_ids(self.after.as_deref(), limit) {
                    Ok(ids) => {
                        self.exhausted = ids.len() < limit;
                        self.after = ids.last().cloned();
                        self.page = ids.into();
                    }
                    Err(e) => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                }
                if self.page.is_empty() {
                    return None;
                }
            }

            let id = self.page.pop_front()?;
            let canonical = self.view.resolver.get_canonical(&id);
            if !self.seen.insert(canonical.clone()) {
                continue;
            }
            match self.view.get_entity(canonical.as_str()) {
                Ok(Some(entity)) => return Some(Ok(entity)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
