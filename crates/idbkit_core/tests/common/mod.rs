//! Helpers shared by the integration tests.

#![allow(dead_code)]

use idbkit_core::{
    CursorDirection, Database, Factory, IdbError, Key, ObjectStore, Request, RequestResult,
    Transaction, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Opens `name` at `version`, running `upgrade` if an upgrade is needed.
pub fn open_with<F>(factory: &Factory, name: &str, version: u64, mut upgrade: F) -> Database
where
    F: FnMut(&Database, &Transaction) + Send + 'static,
{
    let open = factory.open(name, Some(version)).unwrap();
    open.on_upgrade_needed(move |event| {
        upgrade(event.database().unwrap(), event.transaction().unwrap());
    });
    factory.run_until_idle();
    match open.result() {
        Some(RequestResult::Database(db)) => db,
        other => panic!("open failed: {other:?} / {:?}", open.error()),
    }
}

/// Drains the factory and returns the request's outcome.
pub fn settle(factory: &Factory, request: &Request) -> Result<RequestResult, IdbError> {
    factory.run_until_idle();
    match request.error() {
        Some(err) => Err(err),
        None => Ok(request.result().expect("request did not complete")),
    }
}

/// Builds an object value.
pub fn record(pairs: &[(&str, Value)]) -> Value {
    Value::object(pairs.iter().cloned())
}

/// Collects items pushed from callbacks.
#[derive(Clone)]
pub struct Log<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Log<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, item: T) {
        self.0.lock().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().clone()
    }
}

/// Walks a cursor request to the end, recording `(key, primary key)`.
pub fn collect_cursor(factory: &Factory, request: &Request) -> Vec<(Key, Key)> {
    let log = Log::new();
    let sink = log.clone();
    request.on_success(move |event| {
        if let Some(cursor) = event.result().and_then(RequestResult::into_cursor) {
            sink.push((cursor.key().unwrap(), cursor.primary_key().unwrap()));
            cursor.continue_key(None).unwrap();
        }
    });
    factory.run_until_idle();
    log.items()
}

/// Keys of a store in the given direction.
pub fn store_keys(factory: &Factory, store: &ObjectStore, direction: CursorDirection) -> Vec<Key> {
    let request = store.open_cursor(None, direction).unwrap();
    collect_cursor(factory, &request)
        .into_iter()
        .map(|(key, _)| key)
        .collect()
}
