//! Bulk ingestion of serialized entities.

use tracing::{debug, warn};

use super::traits::{StorageError, Writer};
use crate::entity::{CompositeEntity, EntityData};
use crate::error::ValidationError;
use crate::model::Model;

/// One record that was rejected during ingestion.
#[derive(Debug)]
pub struct IngestFailure {
    /// Position of the record in the input.
    pub position: usize,
    /// The record's id, when it had one.
    pub id: Option<String>,
    pub error: ValidationError,
}

/// Outcome of [`ingest`].
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Records written.
    pub entities: usize,
    /// Statements handed to the writer, base statements included.
    pub statements: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// True when no record was rejected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes every valid record attributed to `dataset`.
///
/// A record that fails validation is reported and skipped as a whole; the
/// rest of the batch is still written. Backend failures abort the run. The
/// caller owns the writer and decides when to release it.
pub fn ingest<I>(
    writer: &mut dyn Writer,
    model: &Model,
    dataset: &str,
    records: I,
) -> Result<IngestReport, StorageError>
where
    I: IntoIterator<Item = EntityData>,
{
    let mut report = IngestReport::default();
    for (position, data) in records.into_iter().enumerate() {
        let checked = CompositeEntity::from_data(model, dataset, &data).and_then(|entity| {
            entity
                .statements()
                .iter()
                .try_for_each(|stmt| stmt.validate(model))
                .map(|()| entity)
        });
        let entity = match checked {
            Ok(entity) => entity,
            Err(error) => {
                warn!(position, id = ?data.id, error = %error, "record rejected");
                report.failures.push(IngestFailure {
                    position,
                    id: data.id,
                    error,
                });
                continue;
            }
        };
        writer.add_entity(&entity)?;
        report.entities += 1;
        report.statements += entity.statements().len();
    }
    debug!(
        entities = report.entities,
        statements = report.statements,
        failures = report.failures.len(),
        "ingest finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::dataset::Dataset;
    use crate::resolver::Resolver;
    use crate::storage::{MemoryStore, Store, StoreContext};

    fn record(id: Option<&str>, schema: &str, props: &[(&str, &str)]) -> EntityData {
        let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (prop, value) in props {
            properties.entry((*prop).to_string()).or_default().push((*value).to_string());
        }
        EntityData {
            id: id.map(str::to_string),
            schema: schema.to_string(),
            properties,
            caption: None,
            datasets: Vec::new(),
            referents: Vec::new(),
        }
    }

    #[test]
    fn test_bad_records_do_not_discard_batch() {
        let model = Model::builtin();
        let store = MemoryStore::new(StoreContext::new(Dataset::new("test"), model.clone(), Arc::new(Resolver::new())));
        let records = vec![
            record(Some("a"), "Person", &[("name", "Jane Doe")]),
            record(None, "Person", &[("name", "No Id")]),
            record(Some("c"), "Starship", &[]),
            record(Some("d"), "Company", &[("name", "Acme"), ("flavour", "sour")]),
            record(Some("e"), "Company", &[("name", "Acme Ltd")]),
        ];
        let mut writer = store.writer().unwrap();
        let report = ingest(&mut *writer, &model, "test", records).unwrap();
        writer.release().unwrap();
        drop(writer);

        assert_eq!(report.entities, 2);
        let positions: Vec<usize> = report.failures.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(matches!(report.failures[0].error, ValidationError::MissingId));
        assert_eq!(store.default_view(false).unwrap().entities().count(), 2);
    }
}
