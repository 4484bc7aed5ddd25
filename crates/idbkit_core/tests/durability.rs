//! Committed state survives reopening a file-backed factory.

mod common;

use common::{open_with, record, settle};
use idbkit_core::{
    Config, Durability, Factory, IndexParameters, Key, KeyPath, KeyRange, ObjectStoreParameters,
    RequestResult, TransactionMode, Value,
};
use tempfile::TempDir;

fn populate(factory: &Factory) {
    let db = open_with(factory, "library", 3, |db, _| {
        let params = ObjectStoreParameters::new()
            .key_path(KeyPath::parse("isbn").unwrap())
            .auto_increment(true);
        let books = db.create_object_store("books", params).unwrap();
        books
            .create_index(
                "by_author",
                KeyPath::parse("author").unwrap(),
                IndexParameters::new(),
            )
            .unwrap();
    });
    let books = db
        .transaction(&["books"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("books")
        .unwrap();
    for (title, author) in [("Dune", "Herbert"), ("Emma", "Austen"), ("Persuasion", "Austen")] {
        books
            .add(&record(&[
                ("title", Value::from(title)),
                ("author", Value::from(author)),
            ]))
            .unwrap();
    }
    factory.run_until_idle();

    // Never committed.
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
    txn.object_store("books")
        .unwrap()
        .put(&record(&[("isbn", Value::from(1)), ("title", Value::from("lost"))]))
        .unwrap();
    txn.abort().unwrap();
    db.close();
    factory.run_until_idle();
}

#[test]
fn records_schema_and_generator_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idb.log");

    {
        let factory = Factory::open_file(&path, Config::default()).unwrap();
        populate(&factory);
    }

    let factory = Factory::open_file(&path, Config::default()).unwrap();
    let open = factory.open("library", None).unwrap();
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    assert_eq!(db.version(), 3);
    assert_eq!(db.object_store_names(), vec!["books".to_string()]);

    let books = db
        .transaction(&["books"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("books")
        .unwrap();
    assert_eq!(books.index_names(), vec!["by_author".to_string()]);
    let first = books.get(Key::from(1)).unwrap();
    let austen = books
        .index("by_author")
        .unwrap()
        .get_all_keys(Some(KeyRange::only(Key::from("Austen"))), None)
        .unwrap();
    let next = books.add(&record(&[("title", Value::from("Ulysses"))])).unwrap();
    factory.run_until_idle();

    let first = first.result().and_then(RequestResult::into_value).unwrap();
    assert_eq!(first.get("title"), Some(&Value::from("Dune")));
    assert_eq!(
        austen.result().and_then(RequestResult::into_keys),
        Some(vec![Key::from(2), Key::from(3)])
    );
    assert_eq!(
        next.result().and_then(RequestResult::into_key),
        Some(Key::from(4))
    );
}

#[test]
fn compaction_on_open_keeps_committed_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idb.log");

    {
        let factory = Factory::open_file(&path, Config::default()).unwrap();
        populate(&factory);
    }

    let factory = Factory::open_file(&path, Config::new().compact_on_open(true)).unwrap();
    let open = factory.open("library", None).unwrap();
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    let count = db
        .transaction(&["books"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("books")
        .unwrap()
        .count(None)
        .unwrap();
    assert_eq!(settle(&factory, &count).unwrap().as_count(), Some(3));
}

#[test]
fn deleted_database_stays_deleted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idb.log");

    {
        let factory = Factory::open_file(&path, Config::default()).unwrap();
        populate(&factory);
        let delete = factory.delete_database("library");
        assert!(matches!(
            settle(&factory, &delete).unwrap(),
            RequestResult::Version(3)
        ));
    }

    let factory = Factory::open_file(&path, Config::default()).unwrap();
    let listed = factory.databases();
    assert!(matches!(
        settle(&factory, &listed).unwrap(),
        RequestResult::Databases(infos) if infos.is_empty()
    ));
}

#[test]
fn a_second_factory_cannot_share_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idb.log");
    let _held = Factory::open_file(&path, Config::default()).unwrap();
    assert!(Factory::open_file(&path, Config::default()).is_err());
}

#[test]
fn every_durability_hint_reaches_the_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idb.log");

    {
        let factory = Factory::open_file(&path, Config::new().sync_on_commit(false)).unwrap();
        let db = open_with(&factory, "notes", 1, |db, _| {
            db.create_object_store("notes", ObjectStoreParameters::new())
                .unwrap();
        });
        for (k, durability) in [Durability::Relaxed, Durability::Strict, Durability::Default]
            .into_iter()
            .enumerate()
        {
            let txn = db
                .transaction_with_durability(&["notes"], TransactionMode::ReadWrite, durability)
                .unwrap();
            assert_eq!(txn.durability(), durability);
            let put = txn
                .object_store("notes")
                .unwrap()
                .put_with_key(&Value::from("note"), k as u32)
                .unwrap();
            settle(&factory, &put).unwrap();
        }
        db.close();
        factory.run_until_idle();
    }

    let factory = Factory::open_file(&path, Config::default()).unwrap();
    let open = factory.open("notes", None).unwrap();
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    let keys = db
        .transaction(&["notes"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("notes")
        .unwrap()
        .get_all_keys(None, None)
        .unwrap();
    assert_eq!(
        settle(&factory, &keys).unwrap().into_keys(),
        Some(vec![Key::from(0), Key::from(1), Key::from(2)])
    );
}
