//! Multi-version statement store on a shared [`KvBackend`].
//!
//! Every write lands under a version tag of the store's dataset. The head
//! of the dataset's history list is the version readers see, so publishing
//! a full reload is a single list push: readers either see the previous
//! version or the complete new one.
//!
//! Key layout:
//!
//! ```text
//! hist:{dataset}                         list of released versions, newest first
//! ents:{dataset}:{version}               set of entity ids
//! stmt:{dataset}:{version}:{entity_id}   hash statement id -> JSON statement
//! inv:{dataset}:{version}:{entity_id}    set of referencing entity ids
//! ```

mod backend;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use backend::{KvBackend, KvOp, MemoryKv};

use super::traits::{StorageError, Store, View, Writer};
use super::view::{StatementSource, StatementView};
use super::StoreContext;
use crate::dataset::Dataset;
use crate::model::{Model, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

fn history_key(dataset: &str) -> String {
    format!("hist:{dataset}")
}

fn entities_key(dataset: &str, version: &str) -> String {
    format!("ents:{dataset}:{version}")
}

fn statements_key(dataset: &str, version: &str, entity_id: &str) -> String {
    format!("stmt:{dataset}:{version}:{entity_id}")
}

fn inverted_key(dataset: &str, version: &str, entity_id: &str) -> String {
    format!("inv:{dataset}:{version}:{entity_id}")
}

/// A fresh version tag: UTC timestamp plus a random suffix.
fn make_version() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

fn encode_statement(stmt: &Statement) -> Result<String, StorageError> {
    serde_json::to_string(stmt).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode_statement(raw: &str) -> Result<Statement, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Versioned statement store.
pub struct VersionedStore {
    context: StoreContext,
    kv: Arc<dyn KvBackend>,
}

impl VersionedStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvBackend>, context: StoreContext) -> Self {
        Self { context, kv }
    }

    /// Released versions of `dataset`, newest first.
    pub fn get_history(&self, dataset: &str) -> Result<Vec<String>, StorageError> {
        self.kv.lrange(&history_key(dataset))
    }

    /// The version readers of `dataset` currently see.
    pub fn get_latest(&self, dataset: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_history(dataset)?.into_iter().next())
    }

    /// A writer for a specific version tag.
    ///
    /// Writes to a released version are visible immediately; writes to a new
    /// tag stay invisible until [`Writer::release`] publishes it.
    pub fn writer_for_version(&self, version: &str) -> Result<VersionedWriter<'_>, StorageError> {
        let dataset = self.context.dataset.name.clone();
        let released = self.get_history(&dataset)?.iter().any(|v| v == version);
        debug!(dataset = %dataset, version, released, "versioned writer opened");
        Ok(VersionedWriter {
            store: self,
            dataset,
            version: version.to_string(),
            released,
            batch: Vec::new(),
        })
    }

    /// Removes a version's data and its history entry. Readers fall back to
    /// the next newest version.
    pub fn drop_version(&self, dataset: &str, version: &str) -> Result<(), StorageError> {
        let mut ops = vec![KvOp::LRem {
            key: history_key(dataset),
            value: version.to_string(),
        }];
        ops.push(KvOp::Delete {
            key: entities_key(dataset, version),
        });
        for prefix in [
            statements_key(dataset, version, ""),
            inverted_key(dataset, version, ""),
        ] {
            for key in self.kv.keys_with_prefix(&prefix)? {
                ops.push(KvOp::Delete { key });
            }
        }
        let deleted = ops.len() - 1;
        self.kv.pipeline(ops)?;
        info!(dataset, version, keys = deleted, "dataset version dropped");
        Ok(())
    }

    /// Snapshots the latest version of each dataset in `scope`.
    fn snapshot(&self, scope: &Dataset) -> Result<VersionedSource, StorageError> {
        let mut versions = Vec::new();
        let mut ids = BTreeSet::new();
        for name in scope.scope_names() {
            let Some(version) = self.get_latest(&name)? else {
                continue;
            };
            ids.extend(self.kv.smembers(&entities_key(&name, &version))?);
            versions.push((name, version));
        }
        Ok(VersionedSource {
            kv: self.kv.clone(),
            versions,
            ids: ids.into_iter().collect(),
        })
    }
}

impl Store for VersionedStore {
    fn dataset(&self) -> &Dataset {
        &self.context.dataset
    }

    fn model(&self) -> &Arc<Model> {
        &self.context.model
    }

    fn resolver(&self) -> &Arc<Resolver> {
        &self.context.resolver
    }

    /// Continues the latest version, or starts a new one when the dataset
    /// has no history yet.
    fn writer(&self) -> Result<Box<dyn Writer + '_>, StorageError> {
        let version = match self.get_latest(&self.context.dataset.name)? {
            Some(version) => version,
            None => make_version(),
        };
        Ok(Box::new(self.writer_for_version(&version)?))
    }

    fn view(&self, scope: &Dataset, external: bool) -> Result<Box<dyn View + '_>, StorageError> {
        Ok(Box::new(StatementView::new(
            self.snapshot(scope)?,
            scope,
            external,
            self.context.model.clone(),
            self.context.resolver.clone(),
            self.context.config.page_size,
        )))
    }
}

/// Read side of a view: fixed versions and the entity ids they held when
/// the view was opened.
struct VersionedSource {
    kv: Arc<dyn KvBackend>,
    versions: Vec<(String, String)>,
    ids: Vec<String>,
}

impl StatementSource for VersionedSource {
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let mut out = Vec::new();
        for (dataset, version) in &self.versions {
            for raw in self.kv.hgetall(&statements_key(dataset, version, entity_id))?.values() {
                out.push(decode_statement(raw)?);
            }
        }
        Ok(out)
    }

    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        let mut out = BTreeSet::new();
        for (dataset, version) in &self.versions {
            out.extend(self.kv.smembers(&inverted_key(dataset, version, entity_id))?);
        }
        Ok(out.into_iter().collect())
    }

    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError> {
        let start = after.map_or(0, |a| self.ids.partition_point(|id| id.as_str() <= a));
        Ok(self.ids.iter().skip(start).take(limit).cloned().collect())
    }
}

/// Writes statements under one version tag.
pub struct VersionedWriter<'a> {
    store: &'a VersionedStore,
    dataset: String,
    version: String,
    released: bool,
    batch: Vec<Statement>,
}

impl VersionedWriter<'_> {
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Writer for VersionedWriter<'_> {
    fn add_statement(&mut self, stmt: Statement) -> Result<(), StorageError> {
        self.batch.push(self.store.context.prepare(stmt)?);
        if self.batch.len() >= self.store.context.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn pop(&mut self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        self.flush()?;
        let key = statements_key(&self.dataset, &self.version, entity_id);
        let statements = self
            .store
            .kv
            .hgetall(&key)?
            .values()
            .map(|raw| decode_statement(raw))
            .collect::<Result<Vec<_>, _>>()?;
        if statements.is_empty() {
            return Ok(statements);
        }
        let mut ops = vec![
            KvOp::Delete { key },
            KvOp::SRem {
                key: entities_key(&self.dataset, &self.version),
                member: entity_id.to_string(),
            },
        ];
        for stmt in statements.iter().filter(|s| s.prop_type == PropertyType::Entity) {
            ops.push(KvOp::SRem {
                key: inverted_key(&self.dataset, &self.version, &stmt.value),
                member: entity_id.to_string(),
            });
        }
        self.store.kv.pipeline(ops)?;
        Ok(statements)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let entities = entities_key(&self.dataset, &self.version);
        let mut ops = Vec::with_capacity(self.batch.len() * 2);
        for stmt in &self.batch {
            ops.push(KvOp::HSet {
                key: statements_key(&self.dataset, &self.version, &stmt.entity_id),
                field: stmt.id.clone(),
                value: encode_statement(stmt)?,
            });
            ops.push(KvOp::SAdd {
                key: entities.clone(),
                member: stmt.entity_id.clone(),
            });
            if stmt.prop_type == PropertyType::Entity {
                ops.push(KvOp::SAdd {
                    key: inverted_key(&self.dataset, &self.version, &stmt.value),
                    member: stmt.entity_id.clone(),
                });
            }
        }
        self.store.kv.pipeline(ops)?;
        debug!(version = %self.version, statements = self.batch.len(), "versioned batch written");
        self.batch.clear();
        Ok(())
    }

    /// Flushes and publishes the version as the dataset's latest.
    fn release(&mut self) -> Result<(), StorageError> {
        self.flush()?;
        if self.released {
            return Ok(());
        }
        self.store.kv.pipeline(vec![KvOp::LPush {
            key: history_key(&self.dataset),
            value: self.version.clone(),
        }])?;
        self.released = true;
        info!(dataset = %self.dataset, version = %self.version, "dataset version released");
        Ok(())
    }
}

impl Drop for VersionedWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, version = %self.version, "versioned writer dropped with unflushed statements");
        }
    }
}
