//! The factory: entry point and event loop.
//!
//! Nothing happens in the background. Operations queue work on the engine
//! and [`Factory::run_until_idle`] drives it: each step of the engine
//! produces notifications, which are delivered to callbacks one at a time
//! with the engine lock released. Callbacks may queue more work, which the
//! same drain picks up.

use crate::config::Config;
use crate::database::Database;
use crate::engine::{Engine, FactoryKind, Notification, SharedEngine};
use crate::error::{IdbError, IdbResult};
use crate::event::{RequestEvent, TransactionEvent, VersionChangeEvent};
use crate::request::{OpenRequest, Request, ResultData};
use crate::transaction::Transaction;
use crate::types::{ConnectionId, RequestId, TransactionId, TransactionState, MAX_VERSION};
use idbkit_codec::{compare_keys, encode_key, Key};
use idbkit_storage::{FileBackend, FileBackendOptions, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Opens, deletes and lists databases on one storage backend.
///
/// ```
/// use idbkit_core::{Factory, ObjectStoreParameters};
///
/// let factory = Factory::in_memory();
/// let open = factory.open("shop", Some(1)).unwrap();
/// open.on_upgrade_needed(|event| {
///     let db = event.database().unwrap();
///     db.create_object_store("items", ObjectStoreParameters::new()).unwrap();
/// });
/// factory.run_until_idle();
///
/// let db = open.result().unwrap().into_database().unwrap();
/// assert_eq!(db.object_store_names(), vec!["items".to_string()]);
/// ```
#[derive(Clone)]
pub struct Factory {
    engine: SharedEngine,
}

impl Factory {
    /// Creates a factory over `backend` with the default configuration.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, Config::default())
    }

    /// Creates a factory over `backend`.
    #[must_use]
    pub fn with_config(backend: Arc<dyn StorageBackend>, config: Config) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine::new(backend, config))),
        }
    }

    /// Creates a factory whose databases live in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Creates a factory over a durable log file, creating it if missing.
    ///
    /// # Errors
    ///
    /// `UnknownError` wrapping the storage failure when the file cannot be
    /// opened, locked or recovered.
    pub fn open_file(path: impl AsRef<Path>, config: Config) -> IdbResult<Self> {
        let options = FileBackendOptions::default().compact_on_open(config.compact_on_open);
        let backend = FileBackend::open(path.as_ref(), options)?;
        info!(path = %path.as_ref().display(), "opened durable backend");
        Ok(Self::with_config(Arc::new(backend), config))
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.engine.lock().backend)
    }

    /// Opens a connection, upgrading the database when `version` is above
    /// its current version. `None` opens at the current version, or 1 for
    /// a new database.
    ///
    /// # Errors
    ///
    /// `TypeError` when `version` is 0 or above 2^53 - 1. Everything else
    /// arrives through the request.
    pub fn open(&self, name: &str, version: Option<u64>) -> IdbResult<OpenRequest> {
        if let Some(version) = version {
            if version == 0 || version > MAX_VERSION {
                return Err(IdbError::type_error(format!(
                    "version {version} is out of range"
                )));
            }
        }
        let record = self
            .engine
            .lock()
            .queue_factory(name.to_string(), FactoryKind::Open { version });
        debug!(database = name, ?version, "open queued");
        Ok(OpenRequest::new(self.engine.clone(), record))
    }

    /// Deletes a database. The result is the deleted database's version
    /// (0 when it did not exist).
    #[must_use]
    pub fn delete_database(&self, name: &str) -> OpenRequest {
        let record = self
            .engine
            .lock()
            .queue_factory(name.to_string(), FactoryKind::Delete);
        debug!(database = name, "delete queued");
        OpenRequest::new(self.engine.clone(), record)
    }

    /// Lists the stored databases with their versions.
    #[must_use]
    pub fn databases(&self) -> Request {
        let record = self
            .engine
            .lock()
            .queue_factory(String::new(), FactoryKind::Databases);
        Request::new(self.engine.clone(), record)
    }

    /// Compares two keys: -1, 0 or 1.
    #[must_use]
    pub fn cmp(&self, a: &Key, b: &Key) -> i8 {
        compare_keys(&encode_key(a), &encode_key(b))
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Runs queued work and delivers every resulting event until nothing
    /// can make progress. Returns the number of notifications delivered.
    ///
    /// Transactions created before the call stop accepting requests, as at
    /// the end of a turn. Called from inside a callback it does nothing and
    /// returns 0.
    pub fn run_until_idle(&self) -> usize {
        {
            let mut engine = self.engine.lock();
            if engine.dispatching {
                return 0;
            }
            engine.dispatching = true;
            engine.end_turn();
        }

        let mut delivered = 0;
        loop {
            let next = {
                let mut engine = self.engine.lock();
                loop {
                    if let Some(notification) = engine.next_notification() {
                        break Some(notification);
                    }
                    if !engine.advance() {
                        break None;
                    }
                }
            };
            let Some(notification) = next else {
                break;
            };
            self.dispatch(notification);
            delivered += 1;
        }

        self.engine.lock().dispatching = false;
        delivered
    }

    fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::Request(id) => self.deliver_request(id),
            Notification::UpgradeNeeded {
                request,
                old_version,
                new_version,
            } => self.deliver_upgrade_needed(request, old_version, new_version),
            Notification::Blocked {
                request,
                old_version,
                new_version,
            } => self.deliver_blocked(request, old_version, new_version),
            Notification::VersionChange {
                connection,
                old_version,
                new_version,
            } => self.deliver_version_change(connection, old_version, new_version),
            Notification::Complete(txn) => self.deliver_finished(txn, true),
            Notification::Abort(txn) => self.deliver_finished(txn, false),
        }
        self.engine.lock().end_turn();
    }

    fn deliver_request(&self, id: RequestId) {
        let delivered = self.engine.lock().deliver(id);
        let Some((shared, error)) = delivered else {
            return;
        };
        let (cancelled, txn, callback) = {
            let mut record = shared.lock();
            let callback = if error.is_some() {
                record.on_error.take()
            } else {
                record.on_success.take()
            };
            (record.cancelled, record.transaction.as_ref().map(|t| t.id), callback)
        };

        let reactivated = !cancelled && txn.is_some_and(|t| self.activate(t));
        let request = Request::new(self.engine.clone(), Arc::clone(&shared));
        let event = RequestEvent::new(request, error.clone());
        if let Some(mut callback) = callback {
            callback(&event);
            // Only a request that can be requeued fires again: a cursor
            // still positioned on a record.
            let requeued = self.engine.lock().requests.contains_key(&id);
            let mut record = shared.lock();
            if requeued || matches!(record.result, Some(ResultData::Cursor(Some(_)))) {
                let slot = if error.is_some() {
                    &mut record.on_error
                } else {
                    &mut record.on_success
                };
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
        }

        if let (Some(err), Some(txn), false) = (error, txn, cancelled) {
            self.bubble_error(txn, &event);
            if !event.default_prevented() {
                self.engine.lock().abort_transaction(txn, Some(err));
            }
        }
        if reactivated {
            self.deactivate(txn);
        }
    }

    fn bubble_error(&self, txn: TransactionId, event: &RequestEvent) {
        let callback = self
            .engine
            .lock()
            .transactions
            .get_mut(&txn)
            .and_then(|t| t.on_error.take());
        if let Some(mut callback) = callback {
            callback(event);
            if let Some(t) = self.engine.lock().transactions.get_mut(&txn) {
                if t.on_error.is_none() && !t.state.is_finished() {
                    t.on_error = Some(callback);
                }
            }
        }
    }

    fn deliver_upgrade_needed(&self, request: RequestId, old_version: u64, new_version: u64) {
        let (callback, txn, connection) = {
            let engine = self.engine.lock();
            let Some(record) = engine.requests.get(&request) else {
                return;
            };
            let mut record = record.lock();
            let connection = match &record.result {
                Some(ResultData::Database(connection)) => Some(Arc::clone(connection)),
                _ => None,
            };
            (record.on_upgrade_needed.take(), record.transaction.clone(), connection)
        };
        let activated = txn.as_ref().is_some_and(|t| self.activate(t.id));
        let txn_id = txn.as_ref().map(|t| t.id);
        if let Some(mut callback) = callback {
            let event = VersionChangeEvent::new(
                old_version,
                Some(new_version),
                connection.map(|c| Database::new(self.engine.clone(), c)),
                txn.map(|t| Transaction::new(self.engine.clone(), t)),
            );
            callback(&event);
        }
        if activated {
            self.deactivate(txn_id);
        }
    }

    fn deliver_blocked(&self, request: RequestId, old_version: u64, new_version: Option<u64>) {
        let record = self.engine.lock().requests.get(&request).map(Arc::clone);
        let Some(record) = record else {
            return;
        };
        let callback = record.lock().on_blocked.take();
        if let Some(mut callback) = callback {
            callback(&VersionChangeEvent::new(old_version, new_version, None, None));
            record.lock().on_blocked.get_or_insert(callback);
        }
    }

    fn deliver_version_change(&self, connection: ConnectionId, old_version: u64, new_version: Option<u64>) {
        let target = {
            let mut engine = self.engine.lock();
            match engine.connections.get_mut(&connection) {
                Some(conn) if !conn.close_pending => conn
                    .on_version_change
                    .take()
                    .map(|callback| (callback, Arc::clone(&conn.shared))),
                _ => None,
            }
        };
        if let Some((mut callback, shared)) = target {
            let database = Database::new(self.engine.clone(), shared);
            callback(&VersionChangeEvent::new(
                old_version,
                new_version,
                Some(database),
                None,
            ));
            if let Some(conn) = self.engine.lock().connections.get_mut(&connection) {
                conn.on_version_change.get_or_insert(callback);
            }
        }
    }

    fn deliver_finished(&self, txn: TransactionId, committed: bool) {
        let (callback, error, shared) = {
            let mut engine = self.engine.lock();
            let Some(record) = engine.transactions.get_mut(&txn) else {
                return;
            };
            let callback = if committed {
                record.on_complete.take()
            } else {
                record.on_abort.take()
            };
            (callback, record.error.clone(), Arc::clone(&record.shared))
        };
        if let Some(mut callback) = callback {
            let event = TransactionEvent::new(Transaction::new(self.engine.clone(), shared), error);
            callback(&event);
        }
        self.engine.lock().release_transaction(txn);
    }

    /// Lets an inactive transaction accept requests while its callback
    /// runs. Returns whether it was inactive.
    fn activate(&self, txn: TransactionId) -> bool {
        let mut engine = self.engine.lock();
        match engine.transactions.get_mut(&txn) {
            Some(record) if record.state == TransactionState::Inactive => {
                record.state = TransactionState::Active;
                true
            }
            _ => false,
        }
    }

    fn deactivate(&self, txn: Option<TransactionId>) {
        let Some(txn) = txn else {
            return;
        };
        let mut engine = self.engine.lock();
        if let Some(record) = engine.transactions.get_mut(&txn) {
            if record.state == TransactionState::Active {
                record.state = TransactionState::Inactive;
            }
        }
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory").finish_non_exhaustive()
    }
}
