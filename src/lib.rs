//! # kyro-resolve - entity resolution over statement stores
//!
//! kyro-resolve folds overlapping records about the same real-world entity
//! into canonical identities and keeps the underlying facts as statements
//! in a pluggable store.
//!
//! ## Core Concepts
//!
//! - **Statement**: one property value of one entity from one dataset
//! - **Resolver**: a graph of merge judgements; positive edges form
//!   clusters, each with one canonical id
//! - **Store / View**: statement persistence; views assemble
//!   [`CompositeEntity`] values by following the resolver at read time
//! - **Index**: TF-IDF term index that proposes candidate pairs
//! - **Xref**: scores candidates, auto-merges confident pairs and queues
//!   the rest for review
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use kyro_resolve::{write_with, Dataset, MemoryStore, Model, Resolver, Statement, Store, StoreContext};
//!
//! let resolver = Arc::new(Resolver::new());
//! let store = MemoryStore::new(StoreContext::new(Dataset::new("demo"), Model::builtin(), resolver.clone()));
//! let model = Model::builtin();
//! let company = model.get("Company").unwrap();
//!
//! write_with(&store, |w| {
//!     w.add_statement(Statement::base("c1", "Company", "demo"))?;
//!     w.add_statement(Statement::for_property("c1", company, "name", "Acme Ltd", "demo")?)
//! })?;
//!
//! let view = store.default_view(false)?;
//! let entity = view.get_entity("c1")?.unwrap();
//! assert_eq!(entity.caption(), "Acme Ltd");
//! # Ok::<(), kyro_resolve::KyroError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod codec;
pub mod config;
pub mod dataset;
pub mod entity;
pub mod error;
pub mod identifier;
pub mod judgement;
pub mod model;
pub mod statement;
pub mod text;

// Resolution, storage and matching
pub mod index;
pub mod matching;
pub mod resolver;
pub mod storage;
pub mod xref;

// Re-export primary types at crate root for convenience
pub use config::{ResolverConfig, StoreConfig, XrefConfig};
pub use dataset::Dataset;
pub use entity::{CompositeEntity, EntityData};
pub use error::{IndexError, KyroError, KyroResult, ResolverError, ValidationError};
pub use identifier::Identifier;
pub use judgement::Judgement;
pub use model::{Model, Property, PropertyType, Schema};
pub use statement::Statement;

pub use index::Index;
pub use matching::{LogicV1, MatchingResult, ScoringAlgorithm};
pub use resolver::{Edge, Resolver};
pub use storage::{
    ingest, open_store, write_with, IngestReport, MemoryStore, StorageError, Store, StoreBackend,
    StoreContext, VersionedStore, View, Writer,
};
#[cfg(feature = "kv")]
pub use storage::KvStore;
#[cfg(feature = "sql")]
pub use storage::SqlStore;
pub use xref::{CancellationToken, Xref, XrefReport, XrefStats};
