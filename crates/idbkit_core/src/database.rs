//! Connection handles.

use crate::engine::{ConnectionShared, Engine, SharedEngine};
use crate::error::{IdbError, IdbResult};
use crate::event::VersionChangeEvent;
use crate::object_store::ObjectStore;
use crate::schema::{index_partition, store_partition};
use crate::transaction::Transaction;
use crate::types::{ConnectionId, Durability, TransactionId, TransactionMode};
use idbkit_codec::KeyPath;
use std::sync::Arc;
use tracing::debug;

/// Options for [`Database::create_object_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreParameters {
    /// In-line key path; `None` for out-of-line keys.
    pub key_path: Option<KeyPath>,
    /// Whether the store has a key generator.
    pub auto_increment: bool,
}

impl ObjectStoreParameters {
    /// Out-of-line keys, no key generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key path.
    #[must_use]
    pub fn key_path(mut self, key_path: KeyPath) -> Self {
        self.key_path = Some(key_path);
        self
    }

    /// Sets `auto_increment`.
    #[must_use]
    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// An open connection to a database.
#[derive(Clone)]
pub struct Database {
    engine: SharedEngine,
    shared: Arc<ConnectionShared>,
    connection: ConnectionId,
}

impl Database {
    pub(crate) fn new(engine: SharedEngine, shared: Arc<ConnectionShared>) -> Self {
        Self {
            engine,
            connection: shared.id,
            shared,
        }
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> String {
        self.shared.name.clone()
    }

    /// Version as seen by this connection.
    #[must_use]
    pub fn version(&self) -> u64 {
        let engine = self.engine.lock();
        match engine.connection(self.connection) {
            Ok(conn) => conn.version,
            Err(_) => self.shared.closed.lock().as_ref().map_or(0, |c| c.version),
        }
    }

    /// Store names, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        let engine = self.engine.lock();
        match engine.connection(self.connection) {
            Ok(conn) => conn.schema.store_names(),
            Err(_) => self
                .shared
                .closed
                .lock()
                .as_ref()
                .map(|c| c.store_names.clone())
                .unwrap_or_default(),
        }
    }

    /// Creates an object store. Only allowed during an upgrade.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside a version-change transaction
    /// - `TransactionInactiveError` outside the upgrade's active time
    /// - `ConstraintError` when a store of that name exists
    /// - `InvalidAccessError` for a key generator with an empty or array
    ///   key path
    pub fn create_object_store(
        &self,
        name: &str,
        parameters: ObjectStoreParameters,
    ) -> IdbResult<ObjectStore> {
        let mut engine = self.engine.lock();
        let txn = running_upgrade(&engine, self.connection)?;
        let schema = &engine.connection(self.connection)?.schema;
        if schema.store_by_name(name).is_some() {
            return Err(IdbError::constraint(format!(
                "an object store named {name:?} already exists"
            )));
        }
        if parameters.auto_increment
            && parameters
                .key_path
                .as_ref()
                .is_some_and(|p| p.is_array() || p.is_empty_path())
        {
            return Err(IdbError::invalid_access(
                "a key generator needs a non-empty, non-array key path",
            ));
        }
        let store = engine.connection_mut(self.connection)?.schema.add_store(
            name.to_string(),
            parameters.key_path,
            parameters.auto_increment,
        );
        debug!(connection = %self.connection, %store, name, "object store created");
        let shared = Arc::clone(&engine.txn(txn)?.shared);
        Ok(ObjectStore::new(self.engine.clone(), shared, store))
    }

    /// Deletes an object store with its records and indexes. Only allowed
    /// during an upgrade.
    ///
    /// # Errors
    ///
    /// As for [`Database::create_object_store`]; `NotFoundError` when no
    /// store has that name.
    pub fn delete_object_store(&self, name: &str) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let txn = running_upgrade(&engine, self.connection)?;
        let conn = engine.connection_mut(self.connection)?;
        let store = conn
            .schema
            .store_by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| IdbError::not_found(format!("no object store named {name:?}")))?;
        let Some(removed) = conn.schema.stores.remove(&store) else {
            return Ok(());
        };
        let database = conn.name.clone();

        let record = engine.txn_mut(txn)?;
        record.writes.drop_partition(&store_partition(&database, store));
        for index in removed.indexes.keys() {
            record.writes.drop_partition(&index_partition(&database, *index));
        }
        record.key_generators.remove(&store);
        debug!(connection = %self.connection, %store, name, "object store deleted");
        Ok(())
    }

    /// Starts a transaction over `store_names`.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` once [`Database::close`] was called or while
    ///   an upgrade runs
    /// - `TypeError` for [`TransactionMode::VersionChange`]
    /// - `InvalidAccessError` for an empty scope
    /// - `NotFoundError` for an unknown store
    pub fn transaction<S: AsRef<str>>(
        &self,
        store_names: &[S],
        mode: TransactionMode,
    ) -> IdbResult<Transaction> {
        self.transaction_with_durability(store_names, mode, Durability::Default)
    }

    /// [`Database::transaction`] with a durability hint.
    ///
    /// # Errors
    ///
    /// As for [`Database::transaction`].
    pub fn transaction_with_durability<S: AsRef<str>>(
        &self,
        store_names: &[S],
        mode: TransactionMode,
        durability: Durability,
    ) -> IdbResult<Transaction> {
        let names: Vec<String> = store_names.iter().map(|s| s.as_ref().to_string()).collect();
        let shared = {
            let mut engine = self.engine.lock();
            let id = engine.create_transaction(self.connection, &names, mode, durability)?;
            Arc::clone(&engine.txn(id)?.shared)
        };
        Ok(Transaction::new(self.engine.clone(), shared))
    }

    /// Closes the connection once its transactions have finished.
    pub fn close(&self) {
        if let Ok(conn) = self.engine.lock().connection_mut(self.connection) {
            conn.close_pending = true;
        }
    }

    /// Registers the `versionchange` handler, fired when another open or
    /// delete needs this connection to close.
    pub fn on_version_change(&self, callback: impl FnMut(&VersionChangeEvent) + Send + 'static) {
        if let Ok(conn) = self.engine.lock().connection_mut(self.connection) {
            conn.on_version_change = Some(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &self.connection)
            .finish()
    }
}

/// The connection's version-change transaction, if it may change the schema.
fn running_upgrade(engine: &Engine, connection: ConnectionId) -> IdbResult<TransactionId> {
    let txn = engine
        .connection(connection)?
        .upgrade
        .ok_or_else(|| IdbError::invalid_state("schema changes require a version-change transaction"))?;
    engine.txn(txn)?.ensure_upgrade()?;
    Ok(txn)
}
