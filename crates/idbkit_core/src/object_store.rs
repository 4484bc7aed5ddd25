//! Object store handles.
//!
//! Every method validates synchronously and either fails right away or
//! places a request on the transaction; the request's outcome arrives
//! through its callbacks.

use crate::cursor::CursorState;
use crate::engine::{Engine, SharedEngine};
use crate::error::{IdbError, IdbResult};
use crate::index::{Index, IndexParameters};
use crate::request::{Operation, ReadKind, Request, SharedRequest, Source};
use crate::schema::{index_partition, StoreSchema};
use crate::transaction::{Transaction, TxnShared};
use crate::types::{CursorDirection, CursorId, IndexId, StoreId, TransactionId, TransactionMode};
use idbkit_codec::{can_inject_key, encode_key, extract_key, Key, KeyPath, KeyRange, Value};
use std::sync::Arc;
use tracing::debug;

/// Handle to an object store within a transaction.
#[derive(Clone)]
pub struct ObjectStore {
    engine: SharedEngine,
    shared: Arc<TxnShared>,
    txn: TransactionId,
    store: StoreId,
}

impl ObjectStore {
    pub(crate) fn new(engine: SharedEngine, shared: Arc<TxnShared>, store: StoreId) -> Self {
        Self {
            engine,
            txn: shared.id,
            shared,
            store,
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Store id.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.store
    }

    /// Current name; empty once the store was deleted or the transaction
    /// has finished.
    #[must_use]
    pub fn name(&self) -> String {
        self.engine
            .lock()
            .store_schema(self.txn, self.store)
            .map(|s| s.name)
            .unwrap_or_default()
    }

    /// Key path, for stores with in-line keys.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.engine
            .lock()
            .store_schema(self.txn, self.store)
            .ok()?
            .key_path
    }

    /// Whether the store has a key generator.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.engine
            .lock()
            .store_schema(self.txn, self.store)
            .is_ok_and(|s| s.auto_increment)
    }

    /// Index names, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.engine
            .lock()
            .store_schema(self.txn, self.store)
            .map(|s| s.index_names())
            .unwrap_or_default()
    }

    /// The transaction this handle belongs to.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.engine.clone(), Arc::clone(&self.shared))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Value of the first record in `query`.
    ///
    /// # Errors
    ///
    /// `DataError` for an unbounded range, plus the errors every request
    /// can fail with: `InvalidStateError` once the store was deleted and
    /// `TransactionInactiveError` outside the transaction's active time.
    pub fn get(&self, query: impl Into<KeyRange>) -> IdbResult<Request> {
        let range = bounded(query.into())?;
        self.read(range, ReadKind::Value)
    }

    /// Key of the first record in `query`.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get`].
    pub fn get_key(&self, query: impl Into<KeyRange>) -> IdbResult<Request> {
        let range = bounded(query.into())?;
        self.read(range, ReadKind::Key)
    }

    /// Values of the records in `query` (all when `None`), at most
    /// `count` of them (no limit when `None` or zero).
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get`], without the range check.
    pub fn get_all(&self, query: Option<KeyRange>, count: Option<u32>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Values(count))
    }

    /// Keys of the records in `query`.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get_all`].
    pub fn get_all_keys(&self, query: Option<KeyRange>, count: Option<u32>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Keys(count))
    }

    /// Number of records in `query`.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get_all`].
    pub fn count(&self, query: Option<KeyRange>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Count)
    }

    /// Opens a cursor over the records in `query`.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get_all`].
    pub fn open_cursor(&self, query: Option<KeyRange>, direction: CursorDirection) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let record = open_cursor(&mut engine, self.txn, Source::Store(self.store), query, direction, false)?;
        Ok(Request::new(self.engine.clone(), record))
    }

    /// Opens a cursor that yields keys only.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::get_all`].
    pub fn open_key_cursor(&self, query: Option<KeyRange>, direction: CursorDirection) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let record = open_cursor(&mut engine, self.txn, Source::Store(self.store), query, direction, true)?;
        Ok(Request::new(self.engine.clone(), record))
    }

    fn read(&self, range: KeyRange, kind: ReadKind) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let record = place_read(&mut engine, self.txn, Source::Store(self.store), range, kind)?;
        Ok(Request::new(self.engine.clone(), record))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stores `value`, replacing any record with the same key.
    ///
    /// The key comes from the store's key path or its key generator.
    ///
    /// # Errors
    ///
    /// - `ReadOnlyError` in a read-only transaction
    /// - `DataError` when no key can be determined, or the in-line key is
    ///   invalid or too large
    /// - `DataCloneError` when the value cannot be cloned
    pub fn put(&self, value: &Value) -> IdbResult<Request> {
        self.write(value, None, false)
    }

    /// Stores `value` under an explicit (out-of-line) key.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::put`]; also `DataError` when the store uses
    /// in-line keys.
    pub fn put_with_key(&self, value: &Value, key: impl Into<Key>) -> IdbResult<Request> {
        self.write(value, Some(key.into()), false)
    }

    /// Stores `value`; the request fails with `ConstraintError` when a
    /// record with the same key exists.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::put`].
    pub fn add(&self, value: &Value) -> IdbResult<Request> {
        self.write(value, None, true)
    }

    /// [`ObjectStore::add`] with an explicit key.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::put_with_key`].
    pub fn add_with_key(&self, value: &Value, key: impl Into<Key>) -> IdbResult<Request> {
        self.write(value, Some(key.into()), true)
    }

    /// Deletes the records in `query`.
    ///
    /// # Errors
    ///
    /// `ReadOnlyError` and the errors of [`ObjectStore::get`].
    pub fn delete(&self, query: impl Into<KeyRange>) -> IdbResult<Request> {
        let range = bounded(query.into())?;
        let mut engine = self.engine.lock();
        engine.check_request(self.txn, self.store)?;
        engine.txn(self.txn)?.ensure_writable()?;
        let record = engine.place(
            self.txn,
            Operation::Delete {
                store: self.store,
                range,
            },
        )?;
        Ok(Request::new(self.engine.clone(), record))
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// `ReadOnlyError` and the errors of [`ObjectStore::get_all`].
    pub fn clear(&self) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        engine.check_request(self.txn, self.store)?;
        engine.txn(self.txn)?.ensure_writable()?;
        let record = engine.place(self.txn, Operation::Clear { store: self.store })?;
        Ok(Request::new(self.engine.clone(), record))
    }

    fn write(&self, value: &Value, key: Option<Key>, no_overwrite: bool) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let schema = engine.check_request(self.txn, self.store)?;
        engine.txn(self.txn)?.ensure_writable()?;

        if schema.key_path.is_some() && key.is_some() {
            return Err(IdbError::data(
                "the store uses in-line keys; no key may be given",
            ));
        }
        if schema.key_path.is_none() && !schema.auto_increment && key.is_none() {
            return Err(IdbError::data(
                "the store uses out-of-line keys and has no key generator; a key is required",
            ));
        }

        let value = value.structured_clone().map_err(IdbError::from_input)?;
        let key = match (&schema.key_path, key) {
            (Some(path), _) => match extract_key(&value, path).map_err(IdbError::from_input)? {
                Some(key) => Some(key),
                None => match path {
                    KeyPath::String(path) if schema.auto_increment && can_inject_key(&value, path) => None,
                    _ => {
                        return Err(IdbError::data(
                            "the key path does not yield a key",
                        ))
                    }
                },
            },
            (None, key) => key,
        };
        if let Some(key) = &key {
            check_key_size(&engine, key)?;
        }

        let record = engine.place(
            self.txn,
            Operation::Put {
                store: self.store,
                value,
                key,
                no_overwrite,
            },
        )?;
        Ok(Request::new(self.engine.clone(), record))
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Creates an index and fills it from the existing records.
    ///
    /// Only allowed in a version-change transaction. When the existing
    /// records violate a unique index, the transaction aborts with
    /// `ConstraintError`.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside a version-change transaction or once
    ///   the store was deleted
    /// - `TransactionInactiveError` outside the active time
    /// - `ConstraintError` when an index of that name exists
    /// - `InvalidAccessError` for a multi-entry index on an array key path
    pub fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        parameters: IndexParameters,
    ) -> IdbResult<Index> {
        let mut engine = self.engine.lock();
        let schema = self.schema_change(&engine)?;
        if schema.index_by_name(name).is_some() {
            return Err(IdbError::constraint(format!(
                "an index named {name:?} already exists"
            )));
        }
        if parameters.multi_entry && key_path.is_array() {
            return Err(IdbError::invalid_access(
                "a multi-entry index cannot have an array key path",
            ));
        }

        let index = engine
            .txn_schema_mut(self.txn)?
            .add_index(
                self.store,
                name.to_string(),
                key_path,
                parameters.unique,
                parameters.multi_entry,
            )
            .ok_or_else(|| IdbError::invalid_state("the object store has been deleted"))?;
        engine.place_internal(
            self.txn,
            Operation::PopulateIndex {
                store: self.store,
                index,
            },
        )?;
        debug!(store = %self.store, %index, name, "index created");
        Ok(Index::new(self.engine.clone(), Arc::clone(&self.shared), self.store, index))
    }

    /// Deletes an index and its entries.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::create_index`], with `NotFoundError` when no
    /// index has that name.
    pub fn delete_index(&self, name: &str) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let schema = self.schema_change(&engine)?;
        let index = schema
            .index_by_name(name)
            .map(|i| i.id)
            .ok_or_else(|| IdbError::not_found(format!("no index named {name:?}")))?;
        if let Some(store) = engine.txn_schema_mut(self.txn)?.store_mut(self.store) {
            store.indexes.remove(&index);
        }
        let txn = engine.txn_mut(self.txn)?;
        let partition = index_partition(&txn.database, index);
        txn.writes.drop_partition(&partition);
        debug!(store = %self.store, %index, name, "index deleted");
        Ok(())
    }

    /// Opens an index of this store.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` once the store was deleted or the transaction
    ///   finished
    /// - `NotFoundError` when no index has that name
    pub fn index(&self, name: &str) -> IdbResult<Index> {
        let engine = self.engine.lock();
        let schema = engine.store_schema(self.txn, self.store)?;
        if engine.txn(self.txn)?.state.is_finished() {
            return Err(IdbError::invalid_state("the transaction has finished"));
        }
        let index = schema
            .index_by_name(name)
            .ok_or_else(|| IdbError::not_found(format!("no index named {name:?}")))?;
        Ok(Index::new(self.engine.clone(), Arc::clone(&self.shared), self.store, index.id))
    }

    /// Renames the store.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::create_index`]; `ConstraintError` when another
    /// store has that name.
    pub fn rename(&self, new_name: &str) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let schema = self.schema_change(&engine)?;
        if schema.name == new_name {
            return Ok(());
        }
        let database = engine.txn_schema_mut(self.txn)?;
        if database.store_by_name(new_name).is_some() {
            return Err(IdbError::constraint(format!(
                "an object store named {new_name:?} already exists"
            )));
        }
        if let Some(store) = database.store_mut(self.store) {
            store.name = new_name.to_string();
        }
        Ok(())
    }

    fn schema_change(&self, engine: &Engine) -> IdbResult<StoreSchema> {
        let txn = engine.txn(self.txn)?;
        if txn.mode != TransactionMode::VersionChange {
            return Err(IdbError::invalid_state(
                "schema changes require a version-change transaction",
            ));
        }
        let schema = engine.store_schema(self.txn, self.store)?;
        txn.ensure_active()?;
        Ok(schema)
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("transaction", &self.txn)
            .field("store", &self.store)
            .finish()
    }
}

/// Rejects the unbounded range for single-record operations.
pub(crate) fn bounded(range: KeyRange) -> IdbResult<KeyRange> {
    if range.lower().is_none() && range.upper().is_none() {
        return Err(IdbError::data("a key or a bounded key range is required"));
    }
    Ok(range)
}

fn check_key_size(engine: &Engine, key: &Key) -> IdbResult<()> {
    let size = encode_key(key).len();
    if size > engine.config.max_key_size {
        return Err(IdbError::data(format!(
            "key of {size} bytes exceeds the limit of {}",
            engine.config.max_key_size
        )));
    }
    Ok(())
}

/// Validates a read of `source` and queues it.
pub(crate) fn place_read(
    engine: &mut Engine,
    txn: TransactionId,
    source: Source,
    range: KeyRange,
    kind: ReadKind,
) -> IdbResult<SharedRequest> {
    check_source(engine, txn, source)?;
    engine.place(
        txn,
        Operation::Read {
            source,
            range,
            kind,
        },
    )
}

/// Validates a cursor over `source`, registers it and queues its first
/// iteration.
pub(crate) fn open_cursor(
    engine: &mut Engine,
    txn: TransactionId,
    source: Source,
    query: Option<KeyRange>,
    direction: CursorDirection,
    key_only: bool,
) -> IdbResult<SharedRequest> {
    check_source(engine, txn, source)?;
    let index = match source {
        Source::Store(_) => None,
        Source::Index(_, index) => Some(index),
    };
    let id = CursorId::new(engine.next_id());
    let cursor = CursorState::new(
        txn,
        source.store(),
        index,
        direction,
        query.unwrap_or_else(KeyRange::all),
        key_only,
    );
    let request = engine.place(txn, Operation::Iterate { cursor: id })?;
    engine.cursors.insert(id, cursor);
    Ok(request)
}

fn check_source(engine: &Engine, txn: TransactionId, source: Source) -> IdbResult<()> {
    engine.ensure_running(txn)?;
    let schema = engine.store_schema(txn, source.store())?;
    if let Source::Index(_, index) = source {
        ensure_index(&schema, index)?;
    }
    engine.txn(txn)?.ensure_active()
}

pub(crate) fn ensure_index(schema: &StoreSchema, index: IndexId) -> IdbResult<()> {
    if schema.indexes.contains_key(&index) {
        Ok(())
    } else {
        Err(IdbError::invalid_state("the index has been deleted"))
    }
}
