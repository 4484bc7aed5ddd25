//! Shared setup for the idbkit benchmarks.

use idbkit_codec::{Key, Value};
use idbkit_core::{Database, Factory, KeyPath, ObjectStoreParameters, RequestResult};

/// A record with a numeric `id` and a payload string of `payload` bytes.
#[must_use]
pub fn record(id: u32, payload: usize) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("name", Value::from(format!("user-{id}"))),
        ("payload", Value::from("x".repeat(payload))),
    ])
}

/// Keys of every kind, nested one level.
#[must_use]
pub fn mixed_keys(count: u32) -> Vec<Key> {
    (0..count)
        .map(|i| match i % 4 {
            0 => Key::from(i),
            1 => Key::from(format!("key-{i:06}")),
            2 => Key::Binary(i.to_be_bytes().to_vec()),
            _ => Key::Array(vec![Key::from(i), Key::from("tail")]),
        })
        .collect()
}

/// Opens `bench` with one store `items` keyed by `id`.
///
/// # Panics
///
/// Panics if the database cannot be opened.
#[must_use]
pub fn open_items(factory: &Factory) -> Database {
    let open = factory.open("bench", Some(1)).unwrap();
    open.on_upgrade_needed(|event| {
        if let Some(db) = event.database() {
            let params = ObjectStoreParameters::new().key_path(KeyPath::parse("id").unwrap());
            db.create_object_store("items", params).unwrap();
        }
    });
    factory.run_until_idle();
    match open.result() {
        Some(RequestResult::Database(db)) => db,
        other => panic!("open failed: {other:?}"),
    }
}
