//! SQLite statement backend.
//!
//! One `statement` table holds every statement; `(entity_id, prop, value,
//! dataset)` is unique, and re-adding a statement only refreshes its
//! canonical id, schema, external flag and `last_seen`. Writers buffer up
//! to `batch_size` statements and commit each batch in one transaction, so
//! views never see half a batch.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::traits::{StorageError, Store, View, Writer};
use super::view::{StatementSource, StatementView};
use super::StoreContext;
use crate::dataset::Dataset;
use crate::model::{Model, PropertyType};
use crate::resolver::Resolver;
use crate::statement::Statement;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS statement (
    id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    prop TEXT NOT NULL,
    prop_type TEXT NOT NULL,
    schema TEXT NOT NULL,
    value TEXT NOT NULL,
    original_value TEXT,
    dataset TEXT NOT NULL,
    lang TEXT,
    external INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    UNIQUE (entity_id, prop, value, dataset)
);
CREATE INDEX IF NOT EXISTS statement_canonical_id ON statement (canonical_id);
CREATE INDEX IF NOT EXISTS statement_value ON statement (prop_type, value);
";

const UPSERT: &str = "
INSERT INTO statement (id, entity_id, canonical_id, prop, prop_type, schema, value,
                       original_value, dataset, lang, external, first_seen, last_seen)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT (entity_id, prop, value, dataset) DO UPDATE SET
    canonical_id = excluded.canonical_id,
    schema = excluded.schema,
    external = excluded.external,
    last_seen = excluded.last_seen
";

const SELECT_BY_ENTITY: &str = "
SELECT id, entity_id, canonical_id, prop, prop_type, schema, value,
       original_value, dataset, lang, external, first_seen, last_seen
FROM statement WHERE entity_id = ?1
";

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::BackendError(format!("sqlite: {e}"))
    }
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// A row as stored, before the typed columns are parsed.
struct StatementRow {
    id: String,
    entity_id: String,
    canonical_id: String,
    prop: String,
    prop_type: String,
    schema: String,
    value: String,
    original_value: Option<String>,
    dataset: String,
    lang: Option<String>,
    external: bool,
    first_seen: String,
    last_seen: String,
}

impl StatementRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            canonical_id: row.get(2)?,
            prop: row.get(3)?,
            prop_type: row.get(4)?,
            schema: row.get(5)?,
            value: row.get(6)?,
            original_value: row.get(7)?,
            dataset: row.get(8)?,
            lang: row.get(9)?,
            external: row.get(10)?,
            first_seen: row.get(11)?,
            last_seen: row.get(12)?,
        })
    }

    fn into_statement(self) -> Result<Statement, StorageError> {
        Ok(Statement {
            id: self.id,
            entity_id: self.entity_id,
            canonical_id: self.canonical_id,
            prop: self.prop,
            prop_type: self.prop_type.parse::<PropertyType>()?,
            schema: self.schema,
            value: self.value,
            original_value: self.original_value,
            dataset: self.dataset,
            lang: self.lang,
            external: self.external,
            first_seen: parse_time(&self.first_seen)?,
            last_seen: parse_time(&self.last_seen)?,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp {value:?}: {e}")))
}

fn select_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
    let mut query = conn.prepare_cached(SELECT_BY_ENTITY)?;
    let rows = query
        .query_map([entity_id], StatementRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(StatementRow::into_statement).collect()
}

/// SQLite-backed statement store.
pub struct SqlStore {
    context: StoreContext,
    conn: Mutex<Connection>,
}

impl SqlStore {
    /// Opens a database from a file path, a `sqlite://` URI or `:memory:`.
    pub fn open(uri: &str, context: StoreContext) -> Result<Self, StorageError> {
        let path = uri.strip_prefix("sqlite://").unwrap_or(uri);
        let conn = if path.is_empty() || path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)
                .map_err(|e| StorageError::ConnectionError(format!("{path}: {e}")))?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn
        };
        conn.execute_batch(SCHEMA)?;
        info!(uri, dataset = %context.dataset.name, "sql store opened");
        Ok(Self {
            context,
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored statements.
    pub fn statement_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err("sql.statement_count"))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM statement", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl Store for SqlStore {
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
        Ok(Box::new(SqlWriter {
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

impl StatementSource for SqlStore {
    fn statements(&self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err("sql.statements"))?;
        select_entity(&conn, entity_id)
    }

    fn referencing(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err("sql.referencing"))?;
        let mut query = conn.prepare_cached(
            "SELECT DISTINCT entity_id FROM statement WHERE prop_type = ?1 AND value = ?2",
        )?;
        let ids = query
            .query_map(params![PropertyType::Entity.as_str(), entity_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn entity_ids(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| lock_err("sql.entity_ids"))?;
        let mut query = conn.prepare_cached(
            "SELECT DISTINCT entity_id FROM statement WHERE entity_id > ?1 ORDER BY entity_id LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids = query
            .query_map(params![after.unwrap_or(""), limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

/// Batches statements and commits them in transactions.
pub struct SqlWriter<'a> {
    store: &'a SqlStore,
    batch: Vec<Statement>,
}

impl Writer for SqlWriter<'_> {
    fn add_statement(&mut self, stmt: Statement) -> Result<(), StorageError> {
        self.batch.push(self.store.context.prepare(stmt)?);
        if self.batch.len() >= self.store.context.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn pop(&mut self, entity_id: &str) -> Result<Vec<Statement>, StorageError> {
        self.flush()?;
        let mut conn = self.store.conn.lock().map_err(|_| lock_err("sql.pop"))?;
        let tx = conn.transaction()?;
        let statements = select_entity(&tx, entity_id)?;
        tx.execute("DELETE FROM statement WHERE entity_id = ?1", [entity_id])?;
        tx.commit()?;
        Ok(statements)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.store.conn.lock().map_err(|_| lock_err("sql.flush"))?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(UPSERT)?;
            for stmt in &self.batch {
                insert.execute(params![
                    stmt.id,
                    stmt.entity_id,
                    stmt.canonical_id,
                    stmt.prop,
                    stmt.prop_type.as_str(),
                    stmt.schema,
                    stmt.value,
                    stmt.original_value,
                    stmt.dataset,
                    stmt.lang,
                    stmt.external,
                    stmt.first_seen.to_rfc3339(),
                    stmt.last_seen.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(statements = self.batch.len(), "sql batch committed");
        self.batch.clear();
        Ok(())
    }
}

impl Drop for SqlWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, pending = self.batch.len(), "sql writer dropped with unflushed statements");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn store(batch_size: usize) -> SqlStore {
        let context = StoreContext::new(Dataset::new("test"), Model::builtin(), Arc::new(Resolver::new()))
            .with_config(StoreConfig {
                batch_size,
                ..StoreConfig::default()
            });
        SqlStore::open(":memory:", context).unwrap()
    }

    fn name(id: &str, value: &str) -> Statement {
        let model = Model::builtin();
        Statement::for_property(id, model.get("Company").unwrap(), "name", value, "test").unwrap()
    }

    #[test]
    fn test_batch_invisible_until_flush() {
        let store = store(100);
        let mut writer = store.writer().unwrap();
        writer.add_statement(Statement::base("c1", "Company", "test")).unwrap();
        assert_eq!(store.statement_count().unwrap(), 0);
        writer.flush().unwrap();
        assert_eq!(store.statement_count().unwrap(), 1);
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let store = store(2);
        let mut writer = store.writer().unwrap();
        writer.add_statement(Statement::base("c1", "Company", "test")).unwrap();
        writer.add_statement(name("c1", "Acme")).unwrap();
        assert_eq!(store.statement_count().unwrap(), 2);
    }

    #[test]
    fn test_drop_flushes() {
        let store = store(100);
        {
            let mut writer = store.writer().unwrap();
            writer.add_statement(name("c1", "Acme")).unwrap();
        }
        assert_eq!(store.statement_count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_keeps_one_row() {
        let store = store(100);
        let mut writer = store.writer().unwrap();
        writer.add_statement(name("c1", "Acme")).unwrap();
        writer.add_statement(name("c1", "Acme").external(true)).unwrap();
        writer.release().unwrap();
        assert_eq!(store.statement_count().unwrap(), 1);
        assert!(store.statements("c1").unwrap()[0].external);
    }

    #[test]
    fn test_pop_returns_and_deletes() {
        let store = store(100);
        let mut writer = store.writer().unwrap();
        writer.add_statement(Statement::base("c1", "Company", "test")).unwrap();
        writer.add_statement(name("c1", "Acme")).unwrap();
        let popped = writer.pop("c1").unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(store.statement_count().unwrap(), 0);
    }
}
