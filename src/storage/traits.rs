//! Abstract storage traits.
//!
//! A [`Store`] binds a dataset, a model and a resolver to a statement
//! backend. Writes go through a scoped [`Writer`]; reads go through a
//! [`View`] restricted to a dataset scope, which assembles composite
//! entities by following the resolver at read time.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::dataset::Dataset;
use crate::entity::CompositeEntity;
use crate::error::ValidationError;
use crate::model::{Model, Property, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A statement or entity failed model validation.
    #[error("Invalid statement: {0}")]
    Validation(#[from] ValidationError),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A version tag that is not in the dataset's history.
    #[error("Unknown version {version} of dataset {dataset}")]
    UnknownVersion {
        /// Name of the dataset.
        dataset: String,
        /// The requested version tag.
        version: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// A statement store for one dataset.
pub trait Store: Send + Sync {
    /// The dataset (usually a collection) this store holds.
    fn dataset(&self) -> &Dataset;

    /// Schema model used to validate and assemble entities.
    fn model(&self) -> &Arc<Model>;

    /// Resolver consulted for canonical ids at read time.
    fn resolver(&self) -> &Arc<Resolver>;

    /// Opens a scoped writer. Pending writes are flushed on
    /// [`Writer::release`] and, as a fallback, when the writer is dropped.
    fn writer(&self) -> Result<Box<dyn Writer + '_>, StorageError>;

    /// A read view over `scope`. External statements are only visible when
    /// `external` is true.
    fn view(&self, scope: &Dataset, external: bool) -> Result<Box<dyn View + '_>, StorageError>;

    /// A view over the store's own dataset.
    fn default_view(&self, external: bool) -> Result<Box<dyn View + '_>, StorageError> {
        self.view(self.dataset(), external)
    }

    /// Re-keys the statements of `id`'s whole cluster to its current
    /// canonical id. Returns the number of statements rewritten.
    fn update(&self, id: &str) -> Result<usize, StorageError> {
        let canonical = self.resolver().get_canonical(id);
        let mut writer = self.writer()?;
        let mut count = 0;
        for member in self.resolver().connected(canonical.as_str()) {
            for stmt in writer.pop(member.as_str())? {
                writer.add_statement(stmt)?;
                count += 1;
            }
        }
        writer.release()?;
        debug!(id, canonical = %canonical, statements = count, "store updated");
        Ok(count)
    }
}

/// Buffered statement writer.
pub trait Writer {
    /// Adds one statement. The canonical id is set from the resolver.
    fn add_statement(&mut self, stmt: Statement) -> Result<(), StorageError>;

    /// Adds every statement of an entity.
    fn add_entity(&mut self, entity: &CompositeEntity) -> Result<(), StorageError> {
        for stmt in entity.statements() {
            self.add_statement(stmt.clone())?;
        }
        Ok(())
    }

    /// Removes and returns all statements stored under `entity_id`.
    fn pop(&mut self, entity_id: &str) -> Result<Vec<Statement>, StorageError>;

    /// Commits pending writes.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Commits pending writes and ends the write scope.
    fn release(&mut self) -> Result<(), StorageError> {
        self.flush()
    }
}

/// Read access to assembled entities within a dataset scope.
pub trait View {
    /// Datasets whose statements are visible.
    fn scope(&self) -> &Dataset;

    /// Whether external (candidate) statements are visible.
    fn external(&self) -> bool;

    /// Schema model used to assemble entities.
    fn model(&self) -> &Arc<Model>;

    /// Resolver used to canonicalize ids.
    fn resolver(&self) -> &Arc<Resolver>;

    /// True if `id` is a canonical id with at least one visible statement.
    fn has_entity(&self, id: &str) -> Result<bool, StorageError>;

    /// The entity whose canonical id is `id`. Ids that were merged into
    /// another cluster return `None`; use [`View::resolve_entity`] to follow
    /// the resolver.
    fn get_entity(&self, id: &str) -> Result<Option<CompositeEntity>, StorageError>;

    /// Entities that reference `id`, each paired with the reverse property
    /// describing the reference from `id`'s side.
    fn get_inverted(&self, id: &str) -> Result<Vec<(Property, CompositeEntity)>, StorageError>;

    /// Every visible entity, once per cluster, in entity id order.
    fn entities(&self) -> Box<dyn Iterator<Item = Result<CompositeEntity, StorageError>> + '_>;

    /// Like [`View::get_entity`], but follows `id` to its canonical id first.
    fn resolve_entity(&self, id: &str) -> Result<Option<CompositeEntity>, StorageError> {
        let canonical = self.resolver().get_canonical(id);
        self.get_entity(canonical.as_str())
    }

    /// Entities connected to `entity` through entity-typed properties, and
    /// optionally the ones pointing at it.
    fn get_adjacent(
        &self,
        entity: &CompositeEntity,
        inverted: bool,
    ) -> Result<Vec<(Property, CompositeEntity)>, StorageError> {
        let mut out = Vec::new();
        for (prop, value) in entity.itervalues() {
            if prop.prop_type != PropertyType::Entity {
                continue;
            }
            if let Some(other) = self.resolve_entity(value)? {
                out.push((prop.clone(), other));
            }
        }
        if inverted {
            if let Some(id) = entity.id() {
                out.extend(self.get_inverted(id)?);
            }
        }
        Ok(out)
    }
}

/// Runs `f` inside a write scope, always releasing the writer.
///
/// The error from `f` takes precedence over a failing release.
pub fn write_with<'s, T, F>(store: &'s dyn Store, f: F) -> Result<T, StorageError>
where
    F: FnOnce(&mut (dyn Writer + 's)) -> Result<T, StorageError>,
{
    let mut writer = store.writer()?;
    let result = f(&mut *writer);
    let released = writer.release();
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!(error = %release_err, "writer release failed after error");
            Err(e)
        }
    }
}
