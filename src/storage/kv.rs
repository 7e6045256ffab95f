//! Embedded ordered key-value backend on redb.
//!
//! Key layout (`\0` separates components, ids never contain control
//! characters):
//!
//! ```text
//! statements: "{entity_id}\0{statement_id}" -> codec frame of Statement
//! inverted:   "{referenced_id}\0{entity_id}" -> empty
//! ```
//!
//! Statements of one entity are a contiguous key range, so reading an
//! entity is a single prefix scan and paging entity ids is an ordered scan
//! from the last id seen.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info, warn};

use super::traits::{StorageError, Store, View, Writer};
use super::view::{StatementSource, StatementView};
use super::StoreContext;
use crate::codec;
use crate::dataset::Dataset;
use crate::model::{Model, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

const STATEMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("statements");
const INVERTED: TableDefinition<&str, &[u8]> = TableDefinition::new("inverted");

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::ConnectionError(e.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        Self::BackendError(e.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        Self::BackendError(e.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        Self::BackendError(e.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        Self::BackendError(e.to_string())
    }
}

fn statement_key(entity_id: &str, statement_id: &str) -> String {
    format!("{entity_id}\0{statement_id}")
}

/// Half-open key range covering every key that starts with `{id}\0`.
fn prefix_range(id: &str) -> (String, String) {
    (format!("{id}\0"), format!("{id}\u{1}"))
}

/// redb-backed statement store.
pub struct KvStore {
    context: StoreContext,
    db: Database,
}

impl KvStore {
    /// Opens or creates a database file.
    pub fn open(path: &Path, context: StoreContext) -> Result<Self, StorageError> {
        let db = Database::create(path)?;
        info!(path = %path.display(), dataset = %context.dataset.name, "kv store opened");
        Self::init(db, context)
    }

    /// A store held entirely in memory.
    pub fn open_in_memory(context: StoreContext) -> Result<Self, StorageError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db, context)
    }

    fn init(db: Database, context: StoreContext) -> Result<Self, StorageError> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(STATEMENTS)?;
        write_txn.open_table(INVERTED)?;
        write_txn.commit()?;
        Ok(Self { context, db })
    }

    /// Number of stored statements.
    pub fn statement_count(&self) -> Result<usize, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATEMENTS)?;
        Ok(usize::try_from(table.len()?).unwrap_or(usize::MAX))
    }
}

impl Store for KvStore {
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
        Ok(Box::new(KvWriter {
            store: self,
            batch: Vec::new(),
        }))
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

impl StatementSource for KvStore {
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let (start, end) = prefix_range(entity_id);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATEMENTS)?;
        let mut out = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            out.push(codec::decode_slice(value.value())?);
        }
        Ok(out)
    }

    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        let (start, end) = prefix_range(entity_id);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INVERTED)?;
        let mut out = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            if let Some((_, referrer)) = key.value().split_once('\0') {
                out.push(referrer.to_string());
            }
        }
        Ok(out)
    }

    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError> {
        let start = after.map(|a| format!("{a}\u{1}")).unwrap_or_default();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATEMENTS)?;
        let mut out: Vec<String> = Vec::new();
        for entry in table.range(start.as_str()..)? {
            let (key, _) = entry?;
            let Some((entity_id, _)) = key.value().split_once('\0') else {
                continue;
            };
            if out.last().map(String::as_str) == Some(entity_id) {
                continue;
            }
            if out.len() == limit {
                break;
            }
            out.push(entity_id.to_string());
        }
        Ok(out)
    }
}

/// Buffers statements and writes each batch in one redb transaction.
pub struct KvWriter<'a> {
    store: &'a KvStore,
    batch: Vec<Statement>,
}

impl Writer for KvWriter<'_> {
    fn add_statement(&mut self, stmt: Statement) -> Result<(), StorageError> {
        self.batch.push(self.store.context.prepare(stmt)?);
        if self.batch.len() >= self.store.context.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn pop(&mut self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        self.flush()?;
        let (start, end) = prefix_range(entity_id);
        let write_txn = self.store.db.begin_write()?;
        let statements: Vec<Statement> = {
            let mut table = write_txn.open_table(STATEMENTS)?;
            let mut keys = Vec::new();
            let mut statements = Vec::new();
            for entry in table.range(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                keys.push(key.value().to_string());
                statements.push(codec::decode_slice(value.value())?);
            }
            for key in &keys {
                table.remove(key.as_str())?;
            }
            statements
        };
        {
            let mut inverted = write_txn.open_table(INVERTED)?;
            for stmt in statements.iter().filter(|s| s.prop_type == PropertyType::Entity) {
                inverted.remove(statement_key(&stmt.value, entity_id).as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(statements)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let write_txn = self.store.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATEMENTS)?;
            let mut inverted = write_txn.open_table(INVERTED)?;
            for stmt in &self.batch {
                let bytes = codec::encode(stmt)?;
                table.insert(statement_key(&stmt.entity_id, &stmt.id).as_str(), bytes.as_slice())?;
                if stmt.prop_type == PropertyType::Entity {
                    let empty: &[u8] = &[];
                    inverted.insert(statement_key(&stmt.value, &stmt.entity_id).as_str(), empty)?;
                }
            }
        }
        write_txn.commit()?;
        debug!(statements = self.batch.len(), "kv batch committed");
        self.batch.clear();
        Ok(())
    }
}

impl Drop for KvWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, pending = self.batch.len(), "kv writer dropped with unflushed statements");
        }
    }
}
