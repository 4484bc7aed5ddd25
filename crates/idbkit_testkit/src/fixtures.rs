//! Test fixtures and factory helpers.
//!
//! Provides factories over memory or a temporary log, and helpers that
//! drive requests to completion.

use idbkit_core::{
    Config, Database, Factory, IdbError, Key, ObjectStore, Request, RequestResult, Transaction,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A factory with automatic cleanup of its log file.
pub struct TestFactory {
    /// The factory instance.
    pub factory: Factory,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestFactory {
    /// Creates a factory over memory.
    pub fn memory() -> Self {
        Self {
            factory: Factory::in_memory(),
            _temp_dir: None,
        }
    }

    /// Creates a factory over a log file in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a file-backed factory with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let factory = Factory::open_file(temp_dir.path().join("idb.log"), config)
            .expect("Failed to open file factory");
        Self {
            factory,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the log path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("idb.log"))
    }

    /// Drops the factory and opens a new one over the same log.
    ///
    /// Every handle obtained from the old factory must be dropped first,
    /// otherwise the log is still locked.
    ///
    /// # Panics
    ///
    /// Panics for in-memory factories.
    pub fn reopen(self) -> Self {
        let temp_dir = self._temp_dir.expect("Only file factories can be reopened");
        drop(self.factory);
        let factory = Factory::open_file(temp_dir.path().join("idb.log"), Config::default())
            .expect("Failed to reopen file factory");
        Self {
            factory,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens `name` at `version`, running `upgrade` when an upgrade is
    /// needed, and returns the connection.
    pub fn open_with<F>(&self, name: &str, version: u64, upgrade: F) -> Database
    where
        F: FnMut(&Database, &Transaction) + Send + 'static,
    {
        open_with(&self.factory, name, version, upgrade)
    }

    /// Drains the factory and returns the request's outcome.
    pub fn settle(&self, request: &Request) -> Result<RequestResult, IdbError> {
        settle(&self.factory, request)
    }
}

impl std::ops::Deref for TestFactory {
    type Target = Factory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Opens `name` at `version` on `factory`.
///
/// # Panics
///
/// Panics if the open request fails.
pub fn open_with<F>(factory: &Factory, name: &str, version: u64, mut upgrade: F) -> Database
where
    F: FnMut(&Database, &Transaction) + Send + 'static,
{
    let open = factory.open(name, Some(version)).expect("Invalid version");
    open.on_upgrade_needed(move |event| {
        if let (Some(db), Some(txn)) = (event.database(), event.transaction()) {
            upgrade(db, txn);
        }
    });
    factory.run_until_idle();
    match open.result() {
        Some(RequestResult::Database(db)) => db,
        other => panic!("open failed: {other:?} / {:?}", open.error()),
    }
}

/// Drains `factory` and returns the request's outcome.
///
/// # Panics
///
/// Panics if the request is still pending once the factory is idle.
pub fn settle(factory: &Factory, request: &Request) -> Result<RequestResult, IdbError> {
    factory.run_until_idle();
    match request.error() {
        Some(err) => Err(err),
        None => Ok(request.result().expect("Request did not complete")),
    }
}

/// Opens a read-write transaction over one store and returns the store.
pub fn write_store(db: &Database, name: &str) -> ObjectStore {
    db.transaction(&[name], idbkit_core::TransactionMode::ReadWrite)
        .and_then(|txn| txn.object_store(name))
        .expect("Failed to open store")
}

/// Opens a read-only transaction over one store and returns the store.
pub fn read_store(db: &Database, name: &str) -> ObjectStore {
    db.transaction(&[name], idbkit_core::TransactionMode::ReadOnly)
        .and_then(|txn| txn.object_store(name))
        .expect("Failed to open store")
}

/// Walks a cursor request to the end, collecting `(key, primary key)`.
pub fn collect_cursor(factory: &Factory, request: &Request) -> Vec<(Key, Key)> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    request.on_success(move |event| {
        if let Some(cursor) = event.result().and_then(RequestResult::into_cursor) {
            if let (Some(key), Some(primary_key)) = (cursor.key(), cursor.primary_key()) {
                sink.lock().push((key, primary_key));
            }
            cursor.continue_key(None).expect("Failed to continue cursor");
        }
    });
    factory.run_until_idle();
    let items = seen.lock().clone();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbkit_core::{CursorDirection, ObjectStoreParameters, Value};

    fn items(test: &TestFactory) -> Database {
        test.open_with("shop", 1, |db, _| {
            db.create_object_store("items", ObjectStoreParameters::new())
                .unwrap();
        })
    }

    #[test]
    fn memory_factory_has_no_path() {
        let test = TestFactory::memory();
        assert!(test.path().is_none());
        let db = items(&test);
        assert_eq!(db.version(), 1);
    }

    #[test]
    fn file_factory_survives_reopen() {
        let test = TestFactory::file();
        assert!(test.path().is_some());
        {
            let db = items(&test);
            let put = write_store(&db, "items")
                .put_with_key(&Value::from("apple"), 1)
                .unwrap();
            assert!(test.settle(&put).is_ok());
        }

        let test = test.reopen();
        let open = test.open("shop", None).unwrap();
        let db = test.settle(&open).unwrap().into_database().unwrap();
        let get = read_store(&db, "items").get(Key::from(1)).unwrap();
        assert_eq!(
            test.settle(&get).unwrap().into_value(),
            Some(Value::from("apple"))
        );
    }

    #[test]
    fn cursor_collection_walks_every_record() {
        let test = TestFactory::memory();
        let db = items(&test);
        let store = write_store(&db, "items");
        for k in [3, 1, 2] {
            store.put_with_key(&Value::from(k), k).unwrap();
        }
        let request = store.open_cursor(None, CursorDirection::Prev).unwrap();
        let keys: Vec<Key> = collect_cursor(&test, &request)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![Key::from(3), Key::from(2), Key::from(1)]);
    }
}
