//! End-to-end scenarios: the shop store, cursors, upgrades, atomicity and
//! request ordering.

mod common;

use common::{open_with, record, settle, store_keys, Log};
use idbkit_core::{
    CursorDirection, Factory, Key, KeyPath, KeyRange, ObjectStoreParameters, RequestResult,
    TransactionMode, TransactionState, Value,
};

fn item(id: i32, name: &str) -> Value {
    record(&[("id", Value::from(id)), ("name", Value::from(name))])
}

#[test]
fn shop_add_get_put() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "shop", 1, |db, _| {
        let params = ObjectStoreParameters::new().key_path(KeyPath::parse("id").unwrap());
        db.create_object_store("items", params).unwrap();
    });
    let items = |mode| {
        db.transaction(&["items"], mode)
            .unwrap()
            .object_store("items")
            .unwrap()
    };

    let store = items(TransactionMode::ReadWrite);
    let add = store.add(&item(1, "x")).unwrap();
    let get = store.get(Key::from(1)).unwrap();
    factory.run_until_idle();
    assert_eq!(add.result().unwrap().into_key(), Some(Key::from(1)));
    assert_eq!(get.result().unwrap().into_value(), Some(item(1, "x")));

    let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let duplicate = txn.object_store("items").unwrap().add(&item(1, "z")).unwrap();
    let err = settle(&factory, &duplicate).unwrap_err();
    assert_eq!(err.name(), "ConstraintError");
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(txn.error().unwrap().name(), "ConstraintError");

    let get = items(TransactionMode::ReadOnly).get(Key::from(1)).unwrap();
    assert_eq!(settle(&factory, &get).unwrap().into_value(), Some(item(1, "x")));

    let store = items(TransactionMode::ReadWrite);
    store.put(&item(1, "y")).unwrap();
    let get = store.get(Key::from(1)).unwrap();
    assert_eq!(settle(&factory, &get).unwrap().into_value(), Some(item(1, "y")));

    let count = items(TransactionMode::ReadOnly).count(None).unwrap();
    assert_eq!(settle(&factory, &count).unwrap().as_count(), Some(1));
}

#[test]
fn prevented_error_keeps_the_transaction_alive() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "shop", 1, |db, _| {
        let params = ObjectStoreParameters::new().key_path(KeyPath::parse("id").unwrap());
        db.create_object_store("items", params).unwrap();
    });

    let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("items").unwrap();
    store.add(&item(1, "x")).unwrap();
    let duplicate = store.add(&item(1, "z")).unwrap();
    duplicate.on_error(|event| event.prevent_default());
    store.put(&item(2, "w")).unwrap();
    factory.run_until_idle();

    assert_eq!(duplicate.error().unwrap().name(), "ConstraintError");
    assert_eq!(txn.state(), TransactionState::Committed);
    let count = db
        .transaction(&["items"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("items")
        .unwrap()
        .count(None)
        .unwrap();
    assert_eq!(settle(&factory, &count).unwrap().as_count(), Some(2));
}

#[test]
fn prev_cursor_walks_backwards() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "numbers", 1, |db, _| {
        db.create_object_store("n", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["n"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("n")
        .unwrap();
    for i in [3, 1, 5, 2, 4] {
        store.put_with_key(&Value::from(i * 10), i).unwrap();
    }
    factory.run_until_idle();

    let store = db
        .transaction(&["n"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("n")
        .unwrap();
    let keys = store_keys(&factory, &store, CursorDirection::Prev);
    let expected: Vec<Key> = (1..=5).rev().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[test]
fn cursor_values_advance_and_continue_to_key() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "numbers", 1, |db, _| {
        db.create_object_store("n", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["n"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("n")
        .unwrap();
    for i in 1..=10 {
        store.put_with_key(&Value::from(i * 10), i).unwrap();
    }
    factory.run_until_idle();

    let store = db
        .transaction(&["n"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("n")
        .unwrap();
    let seen = Log::new();
    let sink = seen.clone();
    let request = store.open_cursor(None, CursorDirection::Next).unwrap();
    request.on_success(move |event| {
        let Some(cursor) = event.result().and_then(RequestResult::into_cursor) else {
            return;
        };
        let key = cursor.key().unwrap();
        sink.push((key.clone(), cursor.value().unwrap()));
        if key == Key::from(1) {
            cursor.advance(2).unwrap();
        } else if key == Key::from(3) {
            cursor.continue_key(Some(Key::from(8))).unwrap();
        } else {
            cursor.continue_key(None).unwrap();
        }
    });
    factory.run_until_idle();

    let keys: Vec<Key> = seen.items().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, [1, 3, 8, 9, 10].map(Key::from).to_vec());
    assert_eq!(seen.items()[2].1, Value::from(80));
}

#[test]
fn cursor_rejects_bad_moves() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "numbers", 1, |db, _| {
        db.create_object_store("n", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["n"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("n")
        .unwrap();
    for i in 1..=3 {
        store.put_with_key(&Value::from(i), i).unwrap();
    }
    factory.run_until_idle();

    let errors = Log::new();
    let sink = errors.clone();
    let store = db
        .transaction(&["n"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("n")
        .unwrap();
    let request = store.open_cursor(None, CursorDirection::Next).unwrap();
    request.on_success(move |event| {
        let Some(cursor) = event.result().and_then(RequestResult::into_cursor) else {
            return;
        };
        if cursor.key() != Some(Key::from(2)) {
            cursor.continue_key(None).unwrap();
            return;
        }
        sink.push(cursor.advance(0).unwrap_err().name());
        sink.push(cursor.continue_key(Some(Key::from(1))).unwrap_err().name());
        sink.push(
            cursor
                .continue_primary_key(Key::from(3), Key::from(3))
                .unwrap_err()
                .name(),
        );
        sink.push(cursor.update(&Value::from(0)).unwrap_err().name());
        cursor.continue_key(None).unwrap();
        sink.push(cursor.continue_key(None).unwrap_err().name());
    });
    factory.run_until_idle();

    assert_eq!(
        errors.items(),
        vec![
            "TypeError",
            "DataError",
            "InvalidAccessError",
            "ReadOnlyError",
            "InvalidStateError"
        ]
    );
}

#[test]
fn cursor_update_and_delete() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "numbers", 1, |db, _| {
        db.create_object_store("n", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["n"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("n")
        .unwrap();
    for i in 1..=6 {
        store.put_with_key(&Value::from(i), i).unwrap();
    }
    let request = store.open_cursor(None, CursorDirection::Next).unwrap();
    request.on_success(|event| {
        let Some(cursor) = event.result().and_then(RequestResult::into_cursor) else {
            return;
        };
        let n = cursor.value().and_then(|v| v.as_number()).unwrap();
        if n % 2.0 == 0.0 {
            cursor.delete().unwrap();
        } else {
            cursor.update(&Value::from(n * 100.0)).unwrap();
        }
        cursor.continue_key(None).unwrap();
    });
    factory.run_until_idle();

    let all = db
        .transaction(&["n"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("n")
        .unwrap()
        .get_all(None, None)
        .unwrap();
    let values = settle(&factory, &all).unwrap().into_values().unwrap();
    assert_eq!(values, vec![Value::from(100.0), Value::from(300.0), Value::from(500.0)]);
}

#[test]
fn version_upgrade_then_lower_version_fails() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "shop", 1, |db, _| {
        db.create_object_store("items", ObjectStoreParameters::new()).unwrap();
    });
    assert_eq!(db.version(), 1);
    db.close();

    let versions = Log::new();
    let sink = versions.clone();
    let open = factory.open("shop", Some(2)).unwrap();
    open.on_upgrade_needed(move |event| {
        sink.push((event.old_version(), event.new_version()));
        let db = event.database().unwrap();
        assert_eq!(db.object_store_names(), vec!["items".to_string()]);
        db.create_object_store("orders", ObjectStoreParameters::new()).unwrap();
    });
    let db = settle(&factory, &open).unwrap().into_database().unwrap();
    assert_eq!(versions.items(), vec![(1, Some(2))]);
    assert_eq!(db.version(), 2);
    assert_eq!(
        db.object_store_names(),
        vec!["items".to_string(), "orders".to_string()]
    );

    let lower = factory.open("shop", Some(1)).unwrap();
    assert_eq!(settle(&factory, &lower).unwrap_err().name(), "VersionError");

    let same = factory.open("shop", None).unwrap();
    let again = settle(&factory, &same).unwrap().into_database().unwrap();
    assert_eq!(again.version(), 2);
}

#[test]
fn aborted_puts_are_never_visible() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "atomic", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });

    let aborted = Log::new();
    let txn = db.transaction(&["s"], TransactionMode::ReadWrite).unwrap();
    let sink = aborted.clone();
    txn.on_abort(move |event| sink.push(event.error().is_none()));
    let store = txn.object_store("s").unwrap();
    store.put_with_key(&Value::from("a"), 1).unwrap();
    store.put_with_key(&Value::from("b"), 2).unwrap();
    let last = store.put_with_key(&Value::from("c"), 3).unwrap();
    let pending = store.put_with_key(&Value::from("d"), 4).unwrap();
    last.on_success(|event| event.transaction().unwrap().abort().unwrap());
    factory.run_until_idle();

    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(aborted.items(), vec![true]);
    assert_eq!(pending.error().unwrap().name(), "AbortError");

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
fn abort_before_running_cancels_every_request() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "atomic", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let txn = db.transaction(&["s"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("s").unwrap();
    let put = store.put_with_key(&Value::from(1), 1).unwrap();
    txn.abort().unwrap();
    assert_eq!(txn.abort().unwrap_err().name(), "InvalidStateError");
    assert_eq!(settle(&factory, &put).unwrap_err().name(), "AbortError");
}

#[test]
fn requests_complete_in_order() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "fifo", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    for i in 1..=3 {
        store.put_with_key(&Value::from(i), i).unwrap();
    }
    factory.run_until_idle();

    let order = Log::new();
    let store = db
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("s")
        .unwrap();
    for i in 1..=3 {
        let sink = order.clone();
        store
            .get(Key::from(i))
            .unwrap()
            .on_success(move |_| sink.push(i));
    }
    let range = KeyRange::bound(Key::from(1), Key::from(2), false, false).unwrap();
    let sink = order.clone();
    store
        .get_all_keys(Some(range), None)
        .unwrap()
        .on_success(move |_| sink.push(4));
    factory.run_until_idle();
    assert_eq!(order.items(), vec![1, 2, 3, 4]);
}

#[test]
fn writers_on_the_same_store_run_one_after_another() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "fifo", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let order = Log::new();
    for name in ["first", "second"] {
        let txn = db.transaction(&["s"], TransactionMode::ReadWrite).unwrap();
        let sink = order.clone();
        txn.on_complete(move |_| sink.push(name));
        txn.object_store("s")
            .unwrap()
            .put_with_key(&Value::from(name), 1)
            .unwrap();
    }
    factory.run_until_idle();
    assert_eq!(order.items(), vec!["first", "second"]);

    let get = db
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap()
        .object_store("s")
        .unwrap()
        .get(Key::from(1))
        .unwrap();
    assert_eq!(
        settle(&factory, &get).unwrap().into_value(),
        Some(Value::from("second"))
    );
}
