//! Version lifecycle of the versioned store.

mod common;

use std::sync::Arc;

use kyro_resolve::storage::MemoryKv;
use kyro_resolve::{CompositeEntity, Dataset, Model, Resolver, Store, StoreContext, VersionedStore, Writer};

fn store() -> VersionedStore {
    let context = StoreContext::new(Dataset::new("donations"), Model::builtin(), Arc::new(Resolver::new()));
    VersionedStore::new(Arc::new(MemoryKv::new()), context)
}

fn person() -> CompositeEntity {
    let model = Model::builtin();
    let data = common::record("john-doe", "Person", &[("name", "John Doe"), ("birthDate", "1980-01-01")]);
    CompositeEntity::from_data(&model, "donations", &data).unwrap()
}

#[test]
fn test_versioning_history() {
    common::init_tracing();
    let store = store();
    assert_eq!(store.get_latest("donations").unwrap(), None);
    assert!(store.get_history("donations").unwrap().is_empty());

    let entity = person();
    for version in ["A", "B"] {
        let mut writer = store.writer_for_version(version).unwrap();
        writer.add_entity(&entity).unwrap();
        writer.flush().unwrap();
        writer.release().unwrap();
        assert_eq!(store.get_latest("donations").unwrap().as_deref(), Some(version));
    }
    assert_eq!(store.get_history("donations").unwrap(), vec!["B", "A"]);

    store.drop_version("donations", "B").unwrap();
    assert_eq!(store.get_latest("donations").unwrap().as_deref(), Some("A"));
    assert_eq!(store.get_history("donations").unwrap().len(), 1);

    let view = store.default_view(false).unwrap();
    let found = view.get_entity("john-doe").unwrap().unwrap();
    assert_eq!(found.caption(), "John Doe");
}

#[test]
fn test_unreleased_version_stays_hidden() {
    let store = store();
    let mut writer = store.writer_for_version("A").unwrap();
    writer.add_entity(&person()).unwrap();
    writer.release().unwrap();
    drop(writer);

    let mut writer = store.writer_for_version("B").unwrap();
    let model = Model::builtin();
    let other = common::record("jane-roe", "Person", &[("name", "Jane Roe")]);
    writer
        .add_entity(&CompositeEntity::from_data(&model, "donations", &other).unwrap())
        .unwrap();
    writer.flush().unwrap();

    // Readers still see version A while B is being built.
    let view = store.default_view(false).unwrap();
    assert!(view.has_entity("john-doe").unwrap());
    assert!(!view.has_entity("jane-roe").unwrap());
    drop(view);

    writer.release().unwrap();
    drop(writer);
    let view = store.default_view(false).unwrap();
    assert!(view.has_entity("jane-roe").unwrap());
    assert!(!view.has_entity("john-doe").unwrap());
}

#[test]
fn test_default_writer_continues_latest_version() {
    let store = store();
    let mut writer = store.writer_for_version("A").unwrap();
    writer.add_entity(&person()).unwrap();
    writer.release().unwrap();
    drop(writer);

    let model = Model::builtin();
    let other = common::record("jane-roe", "Person", &[("name", "Jane Roe")]);
    let mut writer = store.writer().unwrap();
    writer
        .add_entity(&CompositeEntity::from_data(&model, "donations", &other).unwrap())
        .unwrap();
    writer.release().unwrap();
    drop(writer);

    assert_eq!(store.get_history("donations").unwrap(), vec!["A"]);
    let view = store.default_view(false).unwrap();
    assert_eq!(view.entities().count(), 2);
}

#[test]
fn test_views_snapshot_the_version() {
    let store = store();
    let mut writer = store.writer_for_version("A").unwrap();
    writer.add_entity(&person()).unwrap();
    writer.release().unwrap();
    drop(writer);

    let view = store.default_view(false).unwrap();
    let mut writer = store.writer_for_version("B").unwrap();
    writer.release().unwrap();
    drop(writer);

    // The old view keeps reading version A.
    assert!(view.get_entity("john-doe").unwrap().is_some());
    assert!(!store.default_view(false).unwrap().has_entity("john-doe").unwrap());
}
