//! Index handles.

use crate::engine::SharedEngine;
use crate::error::{IdbError, IdbResult};
use crate::object_store::{bounded, ensure_index, open_cursor, place_read, ObjectStore};
use crate::request::{ReadKind, Request, Source};
use crate::transaction::TxnShared;
use crate::schema::IndexSchema;
use crate::types::{CursorDirection, IndexId, StoreId, TransactionId, TransactionMode};
use idbkit_codec::{KeyPath, KeyRange};
use std::sync::Arc;

/// Options for [`ObjectStore::create_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParameters {
    /// At most one record per index key.
    pub unique: bool,
    /// An array key path value contributes one entry per element.
    pub multi_entry: bool,
}

impl IndexParameters {
    /// Non-unique, single-entry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unique: false,
            multi_entry: false,
        }
    }

    /// Sets `unique`.
    #[must_use]
    pub const fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets `multi_entry`.
    #[must_use]
    pub const fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}

/// Handle to an index within a transaction.
///
/// Reads through an index work like store reads, except that ranges match
/// index keys and results come in index key order (ties broken by primary
/// key).
#[derive(Clone)]
pub struct Index {
    engine: SharedEngine,
    shared: Arc<TxnShared>,
    txn: TransactionId,
    store: StoreId,
    index: IndexId,
}

impl Index {
    pub(crate) fn new(engine: SharedEngine, shared: Arc<TxnShared>, store: StoreId, index: IndexId) -> Self {
        Self {
            engine,
            txn: shared.id,
            shared,
            store,
            index,
        }
    }

    /// Index id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.index
    }

    /// Current name; empty once the index was deleted.
    #[must_use]
    pub fn name(&self) -> String {
        self.with_schema(|i| i.name.clone()).unwrap_or_default()
    }

    /// Key path.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.with_schema(|i| i.key_path.clone())
    }

    /// Whether the index is unique.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.with_schema(|i| i.unique).unwrap_or(false)
    }

    /// Whether the index is multi-entry.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.with_schema(|i| i.multi_entry).unwrap_or(false)
    }

    /// The store the index belongs to.
    #[must_use]
    pub fn object_store(&self) -> ObjectStore {
        ObjectStore::new(self.engine.clone(), Arc::clone(&self.shared), self.store)
    }

    fn with_schema<T>(&self, f: impl FnOnce(&IndexSchema) -> T) -> Option<T> {
        let engine = self.engine.lock();
        let store = engine.store_schema(self.txn, self.store).ok()?;
        store.indexes.get(&self.index).map(f)
    }

    /// Value of the first record whose index key is in `query`.
    ///
    /// # Errors
    ///
    /// - `DataError` for an unbounded range
    /// - `InvalidStateError` once the index or its store was deleted
    /// - `TransactionInactiveError` outside the active time
    pub fn get(&self, query: impl Into<KeyRange>) -> IdbResult<Request> {
        self.read(bounded(query.into())?, ReadKind::Value)
    }

    /// Primary key of the first record whose index key is in `query`.
    ///
    /// # Errors
    ///
    /// As for [`Index::get`].
    pub fn get_key(&self, query: impl Into<KeyRange>) -> IdbResult<Request> {
        self.read(bounded(query.into())?, ReadKind::Key)
    }

    /// Values of the records in `query`, in index order.
    ///
    /// # Errors
    ///
    /// As for [`Index::get`], without the range check.
    pub fn get_all(&self, query: Option<KeyRange>, count: Option<u32>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Values(count))
    }

    /// Primary keys of the records in `query`, in index order.
    ///
    /// # Errors
    ///
    /// As for [`Index::get_all`].
    pub fn get_all_keys(&self, query: Option<KeyRange>, count: Option<u32>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Keys(count))
    }

    /// Number of index entries in `query`.
    ///
    /// # Errors
    ///
    /// As for [`Index::get_all`].
    pub fn count(&self, query: Option<KeyRange>) -> IdbResult<Request> {
        self.read(query.unwrap_or_else(KeyRange::all), ReadKind::Count)
    }

    /// Opens a cursor over the index.
    ///
    /// # Errors
    ///
    /// As for [`Index::get_all`].
    pub fn open_cursor(&self, query: Option<KeyRange>, direction: CursorDirection) -> IdbResult<Request> {
        self.cursor(query, direction, false)
    }

    /// Opens a cursor that yields index and primary keys only.
    ///
    /// # Errors
    ///
    /// As for [`Index::get_all`].
    pub fn open_key_cursor(&self, query: Option<KeyRange>, direction: CursorDirection) -> IdbResult<Request> {
        self.cursor(query, direction, true)
    }

    /// Renames the index.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside a version-change transaction or once
    ///   the index was deleted
    /// - `TransactionInactiveError` outside the active time
    /// - `ConstraintError` when another index of the store has that name
    pub fn rename(&self, new_name: &str) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let txn = engine.txn(self.txn)?;
        if txn.mode != TransactionMode::VersionChange {
            return Err(IdbError::invalid_state(
                "schema changes require a version-change transaction",
            ));
        }
        let schema = engine.store_schema(self.txn, self.store)?;
        ensure_index(&schema, self.index)?;
        txn.ensure_active()?;

        if schema
            .indexes
            .get(&self.index)
            .is_some_and(|i| i.name == new_name)
        {
            return Ok(());
        }
        if schema.index_by_name(new_name).is_some() {
            return Err(IdbError::constraint(format!(
                "an index named {new_name:?} already exists"
            )));
        }
        if let Some(index) = engine
            .txn_schema_mut(self.txn)?
            .store_mut(self.store)
            .and_then(|s| s.indexes.get_mut(&self.index))
        {
            index.name = new_name.to_string();
        }
        Ok(())
    }

    fn read(&self, range: KeyRange, kind: ReadKind) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let record = place_read(&mut engine, self.txn, self.source(), range, kind)?;
        Ok(Request::new(self.engine.clone(), record))
    }

    fn cursor(&self, query: Option<KeyRange>, direction: CursorDirection, key_only: bool) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let record = open_cursor(&mut engine, self.txn, self.source(), query, direction, key_only)?;
        Ok(Request::new(self.engine.clone(), record))
    }

    fn source(&self) -> Source {
        Source::Index(self.store, self.index)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("store", &self.store)
            .field("index", &self.index)
            .finish()
    }
}
