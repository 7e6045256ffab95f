//! In-memory storage backend.
//!
//! Thread-safe and unbuffered: every write is visible to views immediately.
//! Intended for embedded usage, tests, and as the reference implementation
//! of the store contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use super::traits::{StorageError, Store, View, Writer};
use super::view::{StatementSource, StatementView};
use super::StoreContext;
use crate::dataset::Dataset;
use crate::model::{Model, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct MemoryState {
    /// entity id -> statement id -> statement
    entities: BTreeMap<String, BTreeMap<String, Statement>>,
    /// referenced entity id -> referencing entity ids
    inverted: HashMap<String, BTreeSet<String>>,
}

/// Thread-safe in-memory statement store.
pub struct MemoryStore {
    context: StoreContext,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(context: StoreContext) -> Self {
        Self {
            context,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of stored statements.
    pub fn statement_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("memory.statement_count"))?;
        Ok(state.entities.values().map(BTreeMap::len).sum())
    }
}

impl Store for MemoryStore {
    fn dataset(&self) -> &Dataset {
        &self.context.dataset
    }

    fn model(&self) -> &Arc<Model> {
        &self.context.model
    }

    fn resolver(&self) -> &Arc<Resolver> {
        &self.context.resolver
    }

    fn writer(&self) -> Result<Box<dyn Writer + '_>, StorageError> {
        Ok(Box::new(MemoryWriter { store: self }))
    }

    fn view(&self, scope: &Dataset, external: bool) -> Result<Box<dyn View + '_>, StorageError> {
        Ok(Box::new(StatementView::new(
            self,
            scope,
            external,
            self.context.model.clone(),
            self.context.resolver.clone(),
            self.context.config.page_size,
        )))
    }
}

impl StatementSource for MemoryStore {
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("memory.statements"))?;
        Ok(state
            .entities
            .get(entity_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default())
    }

    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("memory.referencing"))?;
        Ok(state
            .inverted
            .get(entity_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("memory.entity_ids"))?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(state
            .entities
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Writes straight into the shared state.
pub struct MemoryWriter<'a> {
    store: &'a MemoryStore,
}

impl Writer for MemoryWriter<'_> {
    fn add_statement(&mut self, stmt: Statement) -> Result<(), StorageError> {
        let stmt = self.store.context.prepare(stmt)?;
        let mut state = self.store.state.write().map_err(|_| lock_err("memory.add_statement"))?;
        if stmt.prop_type == PropertyType::Entity {
            state
                .inverted
                .entry(stmt.value.clone())
                .or_default()
                .insert(stmt.entity_id.clone());
        }
        let statements = state.entities.entry(stmt.entity_id.clone()).or_default();
        match statements.get_mut(&stmt.id) {
            Some(existing) => {
                existing.last_seen = stmt.last_seen;
                existing.canonical_id = stmt.canonical_id;
                existing.schema = stmt.schema;
            }
            None => {
                statements.insert(stmt.id.clone(), stmt);
            }
        }
        Ok(())
    }

    fn pop(&mut self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let mut state = self.store.state.write().map_err(|_| lock_err("memory.pop"))?;
        let Some(statements) = state.entities.remove(entity_id) else {
            return Ok(Vec::new());
        };
        for stmt in statements.values() {
            if stmt.prop_type != PropertyType::Entity {
                continue;
            }
            if let Some(referrers) = state.inverted.get_mut(&stmt.value) {
                referrers.remove(entity_id);
                if referrers.is_empty() {
                    state.inverted.remove(&stmt.value);
                }
            }
        }
        Ok(statements.into_values().collect())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
