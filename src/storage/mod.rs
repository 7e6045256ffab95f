//! Statement storage.
//!
//! Four interchangeable backends implement the [`Store`] contract:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | [`MemoryStore`] | `memory` | unbuffered, for tests and embedding |
//! | `SqlStore` | `sql` | SQLite, batched transactions (feature `sql`) |
//! | `KvStore` | `kv` | redb ordered keys with prefix scans (feature `kv`) |
//! | [`VersionedStore`] | `versioned` | immutable dataset versions on a [`KvBackend`] |
//!
//! All backends key statements by their raw entity id and canonicalize at
//! read time through [`StatementView`].

mod ingest;
#[cfg(feature = "kv")]
mod kv;
mod memory;
#[cfg(feature = "sql")]
mod sql;
mod traits;
mod versioned;
mod view;

use std::sync::Arc;

pub use ingest::{ingest, IngestFailure, IngestReport};
#[cfg(feature = "kv")]
pub use kv::{KvStore, KvWriter};
pub use memory::{MemoryStore, MemoryWriter};
#[cfg(feature = "sql")]
pub use sql::{SqlStore, SqlWriter};
pub use traits::{write_with, StorageError, Store, View, Writer};
pub use versioned::{KvBackend, KvOp, MemoryKv, VersionedStore, VersionedWriter};
pub use view::{StatementSource, StatementView};

use crate::config::StoreConfig;
use crate::dataset::Dataset;
use crate::model::Model;
use crate::resolver::Resolver;
use crate::statement::Statement;

/// Everything a backend needs besides its storage handle.
#[derive(Clone)]
pub struct StoreContext {
    pub dataset: Dataset,
    pub model: Arc<Model>,
    pub resolver: Arc<Resolver>,
    pub config: StoreConfig,
}

impl StoreContext {
    #[must_use]
    pub fn new(dataset: Dataset, model: Arc<Model>, resolver: Arc<Resolver>) -> Self {
        Self {
            dataset,
            model,
            resolver,
            config: StoreConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates a statement and stamps its current canonical id.
    pub(crate) fn prepare(&self, mut stmt: Statement) -> Result<Statement, StorageError> {
        stmt.validate(&self.model)?;
        stmt.canonical_id = self.resolver.get_canonical(&stmt.entity_id).into_string();
        Ok(stmt)
    }
}

/// Which backend [`open_store`] should construct.
#[derive(Clone)]
pub enum StoreBackend {
    /// Process-local, nothing persisted.
    Memory,
    /// SQLite database path, `sqlite://` URI, or `:memory:`.
    #[cfg(feature = "sql")]
    Sql { uri: String },
    /// redb database file.
    #[cfg(feature = "kv")]
    Kv { path: std::path::PathBuf },
    /// Dataset versions on a shared key-value backend.
    Versioned { kv: Arc<dyn KvBackend> },
}

impl std::fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            #[cfg(feature = "sql")]
            Self::Sql { uri } => f.debug_struct("Sql").field("uri", uri).finish(),
            #[cfg(feature = "kv")]
            Self::Kv { path } => f.debug_struct("Kv").field("path", path).finish(),
            Self::Versioned { .. } => f.write_str("Versioned"),
        }
    }
}

/// Opens a store of the requested kind.
pub fn open_store(backend: StoreBackend, context: StoreContext) -> Result<Box<dyn Store>, StorageError> {
    let context = StoreContext {
        config: context.config.clone().validate()?,
        ..context
    };
    tracing::debug!(backend = ?backend, dataset = %context.dataset.name, "opening store");
    Ok(match backend {
        StoreBackend::Memory => Box::new(MemoryStore::new(context)),
        #[cfg(feature = "sql")]
        StoreBackend::Sql { uri } => Box::new(SqlStore::open(&uri, context)?),
        #[cfg(feature = "kv")]
        StoreBackend::Kv { path } => Box::new(KvStore::open(&path, context)?),
        StoreBackend::Versioned { kv } => Box::new(VersionedStore::new(kv, context)),
    })
}
