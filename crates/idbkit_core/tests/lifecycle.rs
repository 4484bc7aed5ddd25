//! Connections, blocking, deletion, key generators and validation.

mod common;

use common::{open_with, record, settle, Log};
use idbkit_core::{
    Factory, Key, KeyPath, KeyRange, ObjectStoreParameters, RequestResult, TransactionMode,
    TransactionState, Value,
};

#[test]
fn open_is_blocked_until_other_connections_close() {
    let factory = Factory::in_memory();
    let first = open_with(&factory, "db", 1, |_, _| {});

    let events = Log::new();
    let sink = events.clone();
    first.on_version_change(move |event| sink.push(("versionchange", event.old_version(), event.new_version())));

    let open = factory.open("db", Some(2)).unwrap();
    let sink = events.clone();
    open.on_blocked(move |event| sink.push(("blocked", event.old_version(), event.new_version())));
    let sink = events.clone();
    open.on_upgrade_needed(move |event| sink.push(("upgrade", event.old_version(), event.new_version())));
    factory.run_until_idle();

    assert_eq!(
        events.items(),
        vec![("versionchange", 1, Some(2)), ("blocked", 1, Some(2))]
    );
    assert!(open.result().is_none());

    first.close();
    let second = settle(&factory, &open).unwrap().into_database().unwrap();
    assert_eq!(second.version(), 2);
    assert_eq!(events.items().last(), Some(&("upgrade", 1, Some(2))));
    assert_eq!(
        first
            .transaction(&["x"], TransactionMode::ReadOnly)
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
}

#[test]
fn closing_on_versionchange_avoids_blocking() {
    let factory = Factory::in_memory();
    let first = open_with(&factory, "db", 1, |_, _| {});
    first.on_version_change(|event| event.database().unwrap().close());

    let blocked = Log::new();
    let sink = blocked.clone();
    let open = factory.open("db", Some(3)).unwrap();
    open.on_blocked(move |_| sink.push(()));
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    assert_eq!(db.version(), 3);
    assert!(blocked.items().is_empty());
}

#[test]
fn delete_database_removes_everything() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "gone", 4, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    store.put_with_key(&Value::from("v"), 1).unwrap();
    factory.run_until_idle();

    let listed = factory.databases();
    let infos = match settle(&factory, &listed).unwrap() {
        RequestResult::Databases(infos) => infos,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(infos.len(), 1);
    assert_eq!((infos[0].name.as_str(), infos[0].version), ("gone", 4));

    db.close();
    let delete = factory.delete_database("gone");
    assert!(matches!(
        settle(&factory, &delete).unwrap(),
        RequestResult::Version(4)
    ));
    assert!(factory.backend().partitions("db/").unwrap().is_empty());

    let listed = factory.databases();
    assert!(matches!(
        settle(&factory, &listed).unwrap(),
        RequestResult::Databases(infos) if infos.is_empty()
    ));

    let versions = Log::new();
    let sink = versions.clone();
    let open = factory.open("gone", None).unwrap();
    open.on_upgrade_needed(move |event| sink.push(event.old_version()));
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    assert_eq!(versions.items(), vec![0]);
    assert_eq!(db.version(), 1);
    assert!(db.object_store_names().is_empty());
}

#[test]
fn delete_waits_for_open_connections() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "busy", 1, |_, _| {});
    let delete = factory.delete_database("busy");
    let blocked = Log::new();
    let sink = blocked.clone();
    delete.on_blocked(move |event| sink.push(event.new_version()));
    factory.run_until_idle();
    assert_eq!(blocked.items(), vec![None]);
    assert!(delete.result().is_none());

    db.close();
    assert!(matches!(
        settle(&factory, &delete).unwrap(),
        RequestResult::Version(1)
    ));
}

#[test]
fn aborted_creation_is_not_persisted() {
    let factory = Factory::in_memory();
    let open = factory.open("fresh", Some(1)).unwrap();
    open.on_upgrade_needed(|event| {
        event
            .database()
            .unwrap()
            .create_object_store("s", ObjectStoreParameters::new())
            .unwrap();
        event.transaction().unwrap().abort().unwrap();
    });
    assert_eq!(settle(&factory, &open).unwrap_err().name(), "AbortError");

    let listed = factory.databases();
    assert!(matches!(
        settle(&factory, &listed).unwrap(),
        RequestResult::Databases(infos) if infos.is_empty()
    ));
}

#[test]
fn open_rejects_out_of_range_versions() {
    let factory = Factory::in_memory();
    assert_eq!(factory.open("db", Some(0)).unwrap_err().name(), "TypeError");
    assert_eq!(
        factory.open("db", Some(1 << 60)).unwrap_err().name(),
        "TypeError"
    );
}

#[test]
fn key_generator_fills_in_line_keys() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "gen", 1, |db, _| {
        let params = ObjectStoreParameters::new()
            .key_path(KeyPath::parse("meta.id").unwrap())
            .auto_increment(true);
        db.create_object_store("s", params).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    let first = store.add(&record(&[("name", Value::from("a"))])).unwrap();
    let explicit = store
        .add(&record(&[
            ("name", Value::from("b")),
            ("meta", record(&[("id", Value::from(10))])),
        ]))
        .unwrap();
    let after = store.add(&record(&[("name", Value::from("c"))])).unwrap();
    let stored = store.get(Key::from(1)).unwrap();
    factory.run_until_idle();

    assert_eq!(first.result().unwrap().into_key(), Some(Key::from(1)));
    assert_eq!(explicit.result().unwrap().into_key(), Some(Key::from(10)));
    assert_eq!(after.result().unwrap().into_key(), Some(Key::from(11)));
    let stored = stored.result().unwrap().into_value().unwrap();
    assert_eq!(
        stored.get("meta").and_then(|m| m.get("id")),
        Some(&Value::from(1))
    );
}

#[test]
fn key_generator_reverts_on_abort() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "gen", 1, |db, _| {
        let params = ObjectStoreParameters::new().auto_increment(true);
        db.create_object_store("s", params).unwrap();
    });

    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    let kept = store.add(&Value::from("a")).unwrap();
    assert_eq!(settle(&factory, &kept).unwrap().into_key(), Some(Key::from(1)));

    let txn = db.transaction(&["s"], TransactionMode::ReadWrite).unwrap();
    let dropped = txn.object_store("s").unwrap().add(&Value::from("b")).unwrap();
    dropped.on_success(|event| event.transaction().unwrap().abort().unwrap());
    assert_eq!(settle(&factory, &dropped).unwrap().into_key(), Some(Key::from(2)));
    assert_eq!(txn.state(), TransactionState::Aborted);

    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    let next = store.add(&Value::from("c")).unwrap();
    assert_eq!(settle(&factory, &next).unwrap().into_key(), Some(Key::from(2)));
}

#[test]
fn synchronous_validation_errors() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "v", 1, |db, _| {
        let inline = ObjectStoreParameters::new().key_path(KeyPath::parse("id").unwrap());
        db.create_object_store("inline", inline).unwrap();
        db.create_object_store("outline", ObjectStoreParameters::new())
            .unwrap();
    });

    assert_eq!(
        db.transaction::<&str>(&[], TransactionMode::ReadOnly)
            .unwrap_err()
            .name(),
        "InvalidAccessError"
    );
    assert_eq!(
        db.transaction(&["nope"], TransactionMode::ReadOnly)
            .unwrap_err()
            .name(),
        "NotFoundError"
    );
    assert_eq!(
        db.transaction(&["inline"], TransactionMode::VersionChange)
            .unwrap_err()
            .name(),
        "TypeError"
    );

    let txn = db
        .transaction(&["inline", "outline"], TransactionMode::ReadWrite)
        .unwrap();
    let inline = txn.object_store("inline").unwrap();
    let outline = txn.object_store("outline").unwrap();
    let value = record(&[("id", Value::from(1))]);

    assert_eq!(inline.put_with_key(&value, 1).unwrap_err().name(), "DataError");
    assert_eq!(
        inline.put(&record(&[("other", Value::from(1))])).unwrap_err().name(),
        "DataError"
    );
    assert_eq!(
        inline
            .put(&record(&[("id", Value::from(f64::NAN))]))
            .unwrap_err()
            .name(),
        "DataError"
    );
    assert_eq!(outline.put(&value).unwrap_err().name(), "DataError");
    assert_eq!(outline.get(KeyRange::all()).unwrap_err().name(), "DataError");
    assert_eq!(outline.delete(KeyRange::all()).unwrap_err().name(), "DataError");
    assert_eq!(
        txn.object_store("missing").unwrap_err().name(),
        "NotFoundError"
    );

    let readonly = db
        .transaction(&["outline"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("outline")
        .unwrap();
    assert_eq!(
        readonly.put_with_key(&value, 1).unwrap_err().name(),
        "ReadOnlyError"
    );
    assert_eq!(readonly.clear().unwrap_err().name(), "ReadOnlyError");

    factory.run_until_idle();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(
        outline.put_with_key(&value, 1).unwrap_err().name(),
        "TransactionInactiveError"
    );
    assert_eq!(
        txn.object_store("outline").unwrap_err().name(),
        "InvalidStateError"
    );
    assert_eq!(txn.commit().unwrap_err().name(), "InvalidStateError");
}

#[test]
fn explicit_commit_stops_new_requests() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "c", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let txn = db.transaction(&["s"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("s").unwrap();
    let put = store.put_with_key(&Value::from(1), 1).unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.state(), TransactionState::Committing);
    assert_eq!(
        store.put_with_key(&Value::from(2), 2).unwrap_err().name(),
        "TransactionInactiveError"
    );
    assert!(settle(&factory, &put).is_ok());
    assert_eq!(txn.state(), TransactionState::Committed);
}

#[test]
fn requests_placed_in_callbacks_join_the_transaction() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "chain", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    let chained = Log::new();
    let sink = chained.clone();
    let inner = store.clone();
    store
        .put_with_key(&Value::from("a"), 1)
        .unwrap()
        .on_success(move |_| {
            let sink = sink.clone();
            inner
                .get(Key::from(1))
                .unwrap()
                .on_success(move |event| sink.push(event.result().and_then(RequestResult::into_value)));
        });
    factory.run_until_idle();
    assert_eq!(chained.items(), vec![Some(Value::from("a"))]);
}

#[test]
fn deleting_a_store_drops_its_records() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "drop", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    store.put_with_key(&Value::from(1), 1).unwrap();
    factory.run_until_idle();
    db.close();

    let db = open_with(&factory, "drop", 2, |db, _| {
        db.delete_object_store("s").unwrap();
        assert_eq!(db.delete_object_store("s").unwrap_err().name(), "NotFoundError");
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let count = db
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("s")
        .unwrap()
        .count(None)
        .unwrap();
    assert_eq!(settle(&factory, &count).unwrap().as_count(), Some(0));
}

#[test]
fn cmp_follows_key_order() {
    let factory = Factory::in_memory();
    assert_eq!(factory.cmp(&Key::from(-5), &Key::from(-1)), -1);
    assert_eq!(factory.cmp(&Key::from("a"), &Key::from(7)), 1);
    assert_eq!(
        factory.cmp(&Key::Array(vec![Key::from("a")]), &Key::Array(vec![Key::from("a")])),
        0
    );
}
