//! Shared fixtures for the end-to-end suites.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use kyro_resolve::storage::MemoryKv;
use kyro_resolve::{
    ingest, open_store, Dataset, EntityData, Model, Resolver, Store, StoreBackend, StoreContext,
};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Two source datasets under one collection.
pub fn scope() -> Dataset {
    Dataset::collection("all", vec![Dataset::new("left"), Dataset::new("right")])
}

pub fn context(resolver: Arc<Resolver>) -> StoreContext {
    StoreContext::new(scope(), Model::builtin(), resolver)
}

pub fn record(id: &str, schema: &str, props: &[(&str, &str)]) -> EntityData {
    let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (prop, value) in props {
        properties.entry((*prop).to_string()).or_default().push((*value).to_string());
    }
    EntityData {
        id: Some(id.to_string()),
        schema: schema.to_string(),
        properties,
        caption: None,
        datasets: Vec::new(),
        referents: Vec::new(),
    }
}

/// A small corpus with near-duplicates across the two datasets.
pub fn left_records() -> Vec<EntityData> {
    vec![
        record(
            "l-daimler",
            "Company",
            &[("name", "Daimler AG"), ("registrationNumber", "HRB 19360"), ("country", "de")],
        ),
        record("l-klatten", "Person", &[("name", "Susanne Klatten"), ("birthDate", "1962-04-28")]),
        record("l-ford", "Person", &[("name", "Henry Ford"), ("birthDate", "1863-07-30")]),
        record("l-addr", "Address", &[("full", "Mercedesstrasse 120, Stuttgart")]),
        record(
            "l-pay1",
            "Payment",
            &[("payer", "l-daimler"), ("beneficiary", "l-klatten"), ("amount", "100000")],
        ),
    ]
}

pub fn right_records() -> Vec<EntityData> {
    vec![
        record(
            "r-daimler",
            "Company",
            &[("name", "Daimler AG"), ("registrationNumber", "HRB 19360"), ("country", "de")],
        ),
        record("r-klatten", "Person", &[("name", "Susanne Klatten"), ("birthDate", "1962-04-28")]),
        record("r-quandt", "Person", &[("name", "Stefan Quandt"), ("birthDate", "1966-05-09")]),
    ]
}

/// Ingests both fixture datasets into a store.
pub fn load_corpus(store: &dyn Store) {
    let model = Model::builtin();
    for (dataset, records) in [("left", left_records()), ("right", right_records())] {
        let mut writer = store.writer().unwrap();
        let report = ingest(&mut *writer, &model, dataset, records).unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        writer.release().unwrap();
    }
}

/// One store per backend, each with its own resolver. The temp dir keeps
/// on-disk backends alive for the duration of a test.
pub fn backends() -> (TempDir, Vec<(&'static str, Box<dyn Store>)>) {
    let dir = tempfile::tempdir().unwrap();
    let mut out: Vec<(&'static str, Box<dyn Store>)> = Vec::new();
    let mut open = |name: &'static str, backend: StoreBackend| {
        let store = open_store(backend, context(Arc::new(Resolver::new()))).unwrap();
        out.push((name, store));
    };
    open("memory", StoreBackend::Memory);
    #[cfg(feature = "sql")]
    open(
        "sql",
        StoreBackend::Sql {
            uri: format!("sqlite://{}", dir.path().join("statements.db").display()),
        },
    );
    #[cfg(feature = "kv")]
    open(
        "kv",
        StoreBackend::Kv {
            path: dir.path().join("statements.redb"),
        },
    );
    open(
        "versioned",
        StoreBackend::Versioned {
            kv: Arc::new(MemoryKv::new()),
        },
    );
    (dir, out)
}
