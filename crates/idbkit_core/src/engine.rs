//! The engine: all mutable state behind one lock.
//!
//! Handles ([`crate::Factory`], [`crate::Database`], [`crate::Transaction`],
//! ...) are thin `Arc` references to the engine plus an id and the small
//! shared part that outlives the engine's record. The engine only tracks
//! live work: a request leaves it once delivered, a transaction once its
//! `complete` or `abort` was delivered, a connection once it closed.
//!
//! The engine itself never runs user code: [`Engine::advance`] performs one
//! unit of work and queues [`Notification`]s, which the factory's event
//! loop delivers with the lock released. Lock order is the engine first,
//! then any shared record.

use crate::config::Config;
use crate::cursor::CursorState;
use crate::error::{IdbError, IdbResult};
use crate::event::{Callback, VersionChangeEvent};
use crate::request::{Operation, RequestRecord, ResultData, SharedRequest};
use crate::schema::{
    database_prefix, load_schema, meta_key, read_schemas, DatabaseSchema, StoreSchema,
    META_PARTITION,
};
use crate::transaction::overlay::WriteSet;
use crate::transaction::{scheduler, Scope, TxnRecord, TxnShared, UpgradeState};
use crate::types::{
    ConnectionId, CursorId, DatabaseInfo, Durability, ReadyState, RequestId, StoreId,
    TransactionId, TransactionMode, TransactionState,
};
use idbkit_storage::{StorageBackend, WriteBatch};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The engine as shared by every handle.
pub(crate) type SharedEngine = Arc<Mutex<Engine>>;

/// What a [`crate::Database`] handle keeps after its connection closed.
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    pub(crate) id: ConnectionId,
    pub(crate) name: String,
    pub(crate) closed: Mutex<Option<ConnectionSnapshot>>,
}

impl ConnectionShared {
    pub(crate) fn new(id: ConnectionId, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.to_string(),
            closed: Mutex::new(None),
        })
    }
}

/// The version and stores a connection saw when it closed.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSnapshot {
    pub(crate) version: u64,
    pub(crate) store_names: Vec<String>,
}

/// Engine-side state of an open connection.
pub(crate) struct ConnectionRecord {
    pub(crate) shared: Arc<ConnectionShared>,
    pub(crate) name: String,
    pub(crate) version: u64,
    pub(crate) schema: DatabaseSchema,
    pub(crate) close_pending: bool,
    /// The running version-change transaction, if any.
    pub(crate) upgrade: Option<TransactionId>,
    pub(crate) on_version_change: Option<Callback<VersionChangeEvent>>,
}

/// Work queued on the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FactoryKind {
    Open { version: Option<u64> },
    Delete,
    Databases,
}

/// How far a factory operation has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FactoryPhase {
    Queued,
    /// `versionchange` was fired; waiting for the other connections to close.
    AwaitingClose {
        old_version: u64,
        new_version: Option<u64>,
        blocked_fired: bool,
    },
    Upgrading(TransactionId),
}

#[derive(Debug)]
struct FactoryOp {
    request: RequestId,
    name: String,
    kind: FactoryKind,
    phase: FactoryPhase,
}

/// Something user code must hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    Request(RequestId),
    UpgradeNeeded {
        request: RequestId,
        old_version: u64,
        new_version: u64,
    },
    Blocked {
        request: RequestId,
        old_version: u64,
        new_version: Option<u64>,
    },
    VersionChange {
        connection: ConnectionId,
        old_version: u64,
        new_version: Option<u64>,
    },
    Complete(TransactionId),
    Abort(TransactionId),
}

/// Largest key a key generator produces (2^53).
pub(crate) const MAX_GENERATED_KEY: f64 = 9_007_199_254_740_992.0;

pub(crate) struct Engine {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) config: Config,
    next_id: u64,
    pub(crate) connections: HashMap<ConnectionId, ConnectionRecord>,
    pub(crate) transactions: BTreeMap<TransactionId, TxnRecord>,
    /// Requests placed and not yet delivered.
    pub(crate) requests: HashMap<RequestId, SharedRequest>,
    pub(crate) cursors: HashMap<CursorId, CursorState>,
    factory_queue: Vec<FactoryOp>,
    notifications: VecDeque<Notification>,
    /// Transactions created during the current turn.
    fresh: Vec<TransactionId>,
    /// The event loop is running.
    pub(crate) dispatching: bool,
}

impl Engine {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>, config: Config) -> Self {
        Self {
            backend,
            config,
            next_id: 1,
            connections: HashMap::new(),
            transactions: BTreeMap::new(),
            requests: HashMap::new(),
            cursors: HashMap::new(),
            factory_queue: Vec::new(),
            notifications: VecDeque::new(),
            fresh: Vec::new(),
            dispatching: false,
        }
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub(crate) fn connection(&self, id: ConnectionId) -> IdbResult<&ConnectionRecord> {
        self.connections
            .get(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown connection {id}")))
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> IdbResult<&mut ConnectionRecord> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown connection {id}")))
    }

    pub(crate) fn txn(&self, id: TransactionId) -> IdbResult<&TxnRecord> {
        self.transactions
            .get(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown transaction {id}")))
    }

    pub(crate) fn txn_mut(&mut self, id: TransactionId) -> IdbResult<&mut TxnRecord> {
        self.transactions
            .get_mut(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown transaction {id}")))
    }

    /// Schema of the database a transaction runs against.
    pub(crate) fn txn_schema(&self, txn: TransactionId) -> IdbResult<&DatabaseSchema> {
        let connection = self.txn(txn)?.connection;
        Ok(&self.connection(connection)?.schema)
    }

    pub(crate) fn txn_schema_mut(&mut self, txn: TransactionId) -> IdbResult<&mut DatabaseSchema> {
        let connection = self.txn(txn)?.connection;
        Ok(&mut self.connection_mut(connection)?.schema)
    }

    /// A store's schema as seen by `txn`.
    ///
    /// Fails with `InvalidStateError` once the store has been deleted.
    pub(crate) fn store_schema(&self, txn: TransactionId, store: StoreId) -> IdbResult<StoreSchema> {
        self.txn_schema(txn)?
            .store(store)
            .cloned()
            .ok_or_else(|| IdbError::invalid_state("the object store has been deleted"))
    }

    /// Fails with `TransactionInactiveError` once the engine released `txn`.
    pub(crate) fn ensure_running(&self, txn: TransactionId) -> IdbResult<()> {
        if self.transactions.contains_key(&txn) {
            Ok(())
        } else {
            Err(IdbError::transaction_inactive(format!(
                "transaction {txn} has finished"
            )))
        }
    }

    /// Validation shared by every request placed on a store or index.
    pub(crate) fn check_request(&self, txn: TransactionId, store: StoreId) -> IdbResult<StoreSchema> {
        self.ensure_running(txn)?;
        let schema = self.store_schema(txn, store)?;
        self.txn(txn)?.ensure_active()?;
        Ok(schema)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Places a request at the back of a transaction's queue.
    pub(crate) fn place(&mut self, txn: TransactionId, operation: Operation) -> IdbResult<SharedRequest> {
        let owner = self.txn(txn)?;
        owner.ensure_active()?;
        let shared = Arc::clone(&owner.shared);
        let id = RequestId::new(self.next_id());
        let record = Arc::new(Mutex::new(RequestRecord::new(id, Some(shared), Some(operation))));
        self.requests.insert(id, Arc::clone(&record));
        self.txn_mut(txn)?.queue.push_back(id);
        trace!(request = %id, transaction = %txn, "request placed");
        Ok(record)
    }

    /// Places engine bookkeeping that has no handle.
    pub(crate) fn place_internal(&mut self, txn: TransactionId, operation: Operation) -> IdbResult<()> {
        self.place(txn, operation)?.lock().internal = true;
        Ok(())
    }

    /// Puts a delivered request back into its transaction's queue.
    pub(crate) fn requeue(&mut self, request: &SharedRequest, operation: Operation) -> IdbResult<()> {
        let (id, txn) = {
            let mut record = request.lock();
            let txn = record
                .transaction
                .as_ref()
                .map(|t| t.id)
                .ok_or_else(|| IdbError::invalid_state("request has no transaction"))?;
            record.ready = ReadyState::Pending;
            record.result = None;
            record.error = None;
            record.operation = Some(operation);
            (record.id, txn)
        };
        self.txn_mut(txn)?.queue.push_back(id);
        self.requests.insert(id, Arc::clone(request));
        Ok(())
    }

    fn resolve(&mut self, request: RequestId, outcome: IdbResult<ResultData>) {
        if let Some(record) = self.requests.get(&request) {
            record.lock().resolve(outcome);
            self.notifications.push_back(Notification::Request(request));
        }
    }

    /// Makes a request's outcome visible, takes it off its transaction's
    /// queue and stops tracking it. Returns the record with the error, if
    /// the request failed.
    pub(crate) fn deliver(&mut self, request: RequestId) -> Option<(SharedRequest, Option<IdbError>)> {
        let record = self.requests.remove(&request)?;
        let (error, txn) = {
            let mut guard = record.lock();
            (guard.deliver(), guard.transaction.as_ref().map(|t| t.id))
        };
        if let Some(txn) = txn.and_then(|t| self.transactions.get_mut(&t)) {
            txn.queue.retain(|r| *r != request);
        }
        Some((record, error))
    }

    pub(crate) fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Creates a transaction on behalf of `Database::transaction`.
    pub(crate) fn create_transaction(
        &mut self,
        connection: ConnectionId,
        store_names: &[String],
        mode: TransactionMode,
        durability: Durability,
    ) -> IdbResult<TransactionId> {
        let record = self.connection(connection)?;
        if record.close_pending {
            return Err(IdbError::invalid_state("the connection is closing"));
        }
        if let Some(upgrade) = record.upgrade {
            if self
                .transactions
                .get(&upgrade)
                .is_some_and(|t| !t.state.is_finished())
            {
                return Err(IdbError::invalid_state(
                    "a version change transaction is running",
                ));
            }
        }
        if mode == TransactionMode::VersionChange {
            return Err(IdbError::type_error(
                "version change transactions are created by open",
            ));
        }
        if store_names.is_empty() {
            return Err(IdbError::invalid_access("the scope is empty"));
        }
        let mut ids = Vec::with_capacity(store_names.len());
        for name in store_names {
            let store = record.schema.store_by_name(name).ok_or_else(|| {
                IdbError::not_found(format!("no object store named {name:?}"))
            })?;
            ids.push(store.id);
        }

        let shared = Arc::clone(&record.shared);
        let id = TransactionId::new(self.next_id());
        self.transactions.insert(
            id,
            TxnRecord::new(id, shared, Scope::stores(ids), mode, durability),
        );
        self.fresh.push(id);
        debug!(transaction = %id, %mode, "transaction created");
        Ok(id)
    }

    /// Ends the current turn: transactions created during it stop
    /// accepting requests.
    pub(crate) fn end_turn(&mut self) {
        for id in std::mem::take(&mut self.fresh) {
            if let Some(txn) = self.transactions.get_mut(&id) {
                if txn.state == TransactionState::Active {
                    txn.state = TransactionState::Inactive;
                }
            }
        }
    }

    /// Requests an early commit.
    pub(crate) fn request_commit(&mut self, id: TransactionId) -> IdbResult<()> {
        let txn = self.txn_mut(id)?;
        if txn.state != TransactionState::Active {
            return Err(IdbError::invalid_state(format!(
                "transaction {id} is not active"
            )));
        }
        txn.state = TransactionState::Committing;
        Ok(())
    }

    /// Aborts a transaction on behalf of `Transaction::abort`.
    pub(crate) fn request_abort(&mut self, id: TransactionId) -> IdbResult<()> {
        if self.txn(id)?.state.is_finished() {
            return Err(IdbError::invalid_state(format!(
                "transaction {id} has already finished"
            )));
        }
        self.abort_transaction(id, None);
        Ok(())
    }

    /// Discards every change of a transaction.
    ///
    /// Undelivered requests resolve with `AbortError`, then `abort` fires.
    /// Aborting a version-change transaction also restores the schema and
    /// version and fails the open request.
    pub(crate) fn abort_transaction(&mut self, id: TransactionId, error: Option<IdbError>) {
        let Some(txn) = self.transactions.get_mut(&id) else {
            return;
        };
        if txn.state.is_finished() {
            return;
        }
        txn.state = TransactionState::Aborted;
        txn.error = error;
        txn.writes = WriteSet::new();
        txn.key_generators.clear();
        let pending: Vec<RequestId> = txn.queue.drain(..).collect();
        let upgrade = txn.upgrade.take();
        let connection = txn.connection;
        debug!(transaction = %id, error = ?txn.error, "transaction aborted");

        for request in pending {
            let Some(shared) = self.requests.get(&request).map(Arc::clone) else {
                continue;
            };
            let mut record = shared.lock();
            record.operation = None;
            record.cancelled = true;
            if record.internal {
                drop(record);
                self.requests.remove(&request);
                continue;
            }
            let queued = record.notified;
            record.resolve(Err(IdbError::abort("the transaction was aborted")));
            if !queued {
                self.notifications.push_back(Notification::Request(request));
            }
        }
        self.notifications.push_back(Notification::Abort(id));

        if let Some(upgrade) = upgrade {
            if let Some(conn) = self.connections.get_mut(&connection) {
                conn.schema = upgrade.schema_before;
                conn.version = upgrade.old_version;
                conn.upgrade = None;
                conn.close_pending = true;
            }
            self.finish_open(
                upgrade.request,
                id,
                Err(IdbError::abort("the version change transaction was aborted")),
            );
        }
    }

    /// Makes a transaction's writes durable and fires `complete`.
    pub(crate) fn commit_transaction(&mut self, id: TransactionId) {
        if let Err(err) = self.write_commit(id) {
            warn!(transaction = %id, error = %err, "commit failed");
            self.abort_transaction(id, Some(err));
            return;
        }
        let Some(txn) = self.transactions.get_mut(&id) else {
            return;
        };
        txn.state = TransactionState::Committed;
        txn.writes = WriteSet::new();
        txn.key_generators.clear();
        let upgrade = txn.upgrade.take();
        let connection = txn.connection;
        debug!(transaction = %id, "transaction committed");
        self.notifications.push_back(Notification::Complete(id));

        if let Some(upgrade) = upgrade {
            let outcome = match self.connections.get_mut(&connection) {
                Some(conn) => {
                    conn.upgrade = None;
                    if conn.close_pending {
                        Err(IdbError::abort("the connection was closed during the upgrade"))
                    } else {
                        Ok(ResultData::Database(Arc::clone(&conn.shared)))
                    }
                }
                None => Err(IdbError::abort("the connection is gone")),
            };
            self.finish_open(upgrade.request, id, outcome);
        }
    }

    fn write_commit(&self, id: TransactionId) -> IdbResult<()> {
        let txn = self.txn(id)?;
        let mut batch = txn.writes.to_batch();
        if let Some(record) = self.commit_meta(txn)? {
            batch.put(META_PARTITION, meta_key(&txn.database), record);
        }
        if batch.is_empty() {
            return Ok(());
        }
        trace!(transaction = %id, ops = batch.len(), "applying commit batch");
        self.backend.apply(&batch)?;
        let sync = match txn.durability {
            Durability::Strict => true,
            Durability::Relaxed => false,
            Durability::Default => self.config.sync_on_commit,
        };
        if sync {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(())
    }

    /// The schema record a commit must write, if any.
    fn commit_meta(&self, txn: &TxnRecord) -> IdbResult<Option<Vec<u8>>> {
        let mut schema = if txn.upgrade.is_some() {
            let conn = self.connection(txn.connection)?;
            let mut schema = conn.schema.clone();
            schema.version = conn.version;
            schema
        } else if txn.key_generators.is_empty() {
            return Ok(None);
        } else {
            match load_schema(self.backend.as_ref(), &txn.database)? {
                Some(schema) => schema,
                None => return Ok(None),
            }
        };
        for (store, current) in &txn.key_generators {
            if let Some(store) = schema.store_mut(*store) {
                store.current_number = *current;
            }
        }
        Ok(Some(schema.to_bytes()?))
    }

    /// The key generator number `txn` sees for `store`.
    pub(crate) fn current_key_number(&self, txn: TransactionId, store: &StoreSchema) -> IdbResult<f64> {
        let record = self.txn(txn)?;
        if let Some(current) = record.key_generators.get(&store.id) {
            return Ok(*current);
        }
        if record.upgrade.is_none() {
            if let Some(stored) = load_schema(self.backend.as_ref(), &record.database)? {
                if let Some(stored) = stored.store(store.id) {
                    return Ok(stored.current_number);
                }
            }
        }
        Ok(store.current_number)
    }

    // ========================================================================
    // Factory operations
    // ========================================================================

    pub(crate) fn queue_factory(&mut self, name: String, kind: FactoryKind) -> SharedRequest {
        let request = RequestId::new(self.next_id());
        let record = Arc::new(Mutex::new(RequestRecord::new(request, None, None)));
        self.requests.insert(request, Arc::clone(&record));
        self.factory_queue.push(FactoryOp {
            request,
            name,
            kind,
            phase: FactoryPhase::Queued,
        });
        record
    }

    fn connect(&mut self, schema: DatabaseSchema) -> Arc<ConnectionShared> {
        let id = ConnectionId::new(self.next_id());
        let shared = ConnectionShared::new(id, &schema.name);
        self.connections.insert(
            id,
            ConnectionRecord {
                shared: Arc::clone(&shared),
                name: schema.name.clone(),
                version: schema.version,
                schema,
                close_pending: false,
                upgrade: None,
                on_version_change: None,
            },
        );
        debug!(connection = %id, "connection opened");
        shared
    }

    fn finish_open(
        &mut self,
        request: RequestId,
        upgrade: TransactionId,
        outcome: IdbResult<ResultData>,
    ) {
        self.factory_queue
            .retain(|op| op.phase != FactoryPhase::Upgrading(upgrade));
        if let Some(record) = self.requests.get(&request) {
            record.lock().transaction = None;
        }
        self.resolve(request, outcome);
    }

    /// Advances the oldest factory operation of each database that can
    /// make progress.
    fn factory_step(&mut self) -> bool {
        let mut seen = HashSet::new();
        for index in 0..self.factory_queue.len() {
            let op = &self.factory_queue[index];
            if op.kind == FactoryKind::Databases {
                let request = self.factory_queue.remove(index).request;
                let outcome = read_schemas(self.backend.as_ref()).map(|schemas| {
                    ResultData::Databases(
                        schemas
                            .into_iter()
                            .map(|s| DatabaseInfo {
                                name: s.name,
                                version: s.version,
                            })
                            .collect(),
                    )
                });
                self.resolve(request, outcome);
                return true;
            }
            if !seen.insert(op.name.clone()) {
                continue;
            }
            if self.step_factory_op(index) {
                return true;
            }
        }
        false
    }

    fn step_factory_op(&mut self, index: usize) -> bool {
        let op = &self.factory_queue[index];
        let (request, name, kind, phase) = (op.request, op.name.clone(), op.kind.clone(), op.phase);
        match phase {
            FactoryPhase::Queued => {
                let stored = match load_schema(self.backend.as_ref(), &name) {
                    Ok(stored) => stored,
                    Err(err) => {
                        self.factory_queue.remove(index);
                        self.resolve(request, Err(err));
                        return true;
                    }
                };
                let current = stored.as_ref().map_or(0, |s| s.version);
                let new_version = match kind {
                    FactoryKind::Open { version } => {
                        let requested = version.unwrap_or(current.max(1));
                        if requested < current {
                            self.factory_queue.remove(index);
                            self.resolve(
                                request,
                                Err(IdbError::version(format!(
                                    "requested version {requested} is lower than the current version {current}"
                                ))),
                            );
                            return true;
                        }
                        if requested == current {
                            if let Some(schema) = stored {
                                self.factory_queue.remove(index);
                                let connection = self.connect(schema);
                                self.resolve(request, Ok(ResultData::Database(connection)));
                                return true;
                            }
                        }
                        Some(requested)
                    }
                    _ => None,
                };
                self.fire_version_change(&name, current, new_version);
                self.factory_queue[index].phase = FactoryPhase::AwaitingClose {
                    old_version: current,
                    new_version,
                    blocked_fired: false,
                };
                true
            }
            FactoryPhase::AwaitingClose {
                old_version,
                new_version,
                blocked_fired,
            } => {
                let open = self.connections.values().any(|c| c.name == name);
                if open {
                    if blocked_fired {
                        return false;
                    }
                    self.factory_queue[index].phase = FactoryPhase::AwaitingClose {
                        old_version,
                        new_version,
                        blocked_fired: true,
                    };
                    self.notifications.push_back(Notification::Blocked {
                        request,
                        old_version,
                        new_version,
                    });
                    return true;
                }
                match new_version {
                    Some(new_version) => self.begin_upgrade(index, old_version, new_version),
                    None => {
                        self.factory_queue.remove(index);
                        let outcome = self
                            .delete_database_now(&name)
                            .map(|()| ResultData::Version(old_version));
                        self.resolve(request, outcome);
                    }
                }
                true
            }
            FactoryPhase::Upgrading(_) => false,
        }
    }

    fn fire_version_change(&mut self, name: &str, old_version: u64, new_version: Option<u64>) {
        let mut targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.name == name && !c.close_pending)
            .map(|(id, _)| *id)
            .collect();
        targets.sort();
        for connection in targets {
            self.notifications.push_back(Notification::VersionChange {
                connection,
                old_version,
                new_version,
            });
        }
    }

    fn begin_upgrade(&mut self, index: usize, old_version: u64, new_version: u64) {
        let request = self.factory_queue[index].request;
        let name = self.factory_queue[index].name.clone();
        let schema_before = match load_schema(self.backend.as_ref(), &name) {
            Ok(Some(schema)) => schema,
            Ok(None) => DatabaseSchema::new(name.clone()),
            Err(err) => {
                self.factory_queue.remove(index);
                self.resolve(request, Err(err));
                return;
            }
        };

        let mut schema = schema_before.clone();
        schema.version = new_version;
        let shared = self.connect(schema);
        let connection = shared.id;
        let txn_id = TransactionId::new(self.next_id());
        let mut txn = TxnRecord::new(
            txn_id,
            Arc::clone(&shared),
            Scope::All,
            TransactionMode::VersionChange,
            Durability::Strict,
        );
        txn.state = TransactionState::Inactive;
        txn.upgrade = Some(UpgradeState {
            request,
            old_version,
            schema_before,
        });
        let txn_shared = Arc::clone(&txn.shared);
        self.transactions.insert(txn_id, txn);
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.upgrade = Some(txn_id);
        }
        if let Some(record) = self.requests.get(&request) {
            let mut record = record.lock();
            record.transaction = Some(txn_shared);
            record.result = Some(ResultData::Database(shared));
            record.ready = ReadyState::Done;
        }
        self.factory_queue[index].phase = FactoryPhase::Upgrading(txn_id);
        self.notifications.push_back(Notification::UpgradeNeeded {
            request,
            old_version,
            new_version,
        });
        debug!(database = %name, old_version, new_version, "upgrade started");
    }

    fn delete_database_now(&self, name: &str) -> IdbResult<()> {
        let mut batch = WriteBatch::new();
        for partition in self.backend.partitions(&database_prefix(name))? {
            batch.drop_partition(partition);
        }
        batch.delete(META_PARTITION, meta_key(name));
        self.backend.apply(&batch)?;
        self.backend.sync()?;
        debug!(database = %name, "database deleted");
        Ok(())
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Performs one unit of work. Returns `false` when nothing can move.
    ///
    /// Steps are tried in order; the first that makes progress ends the
    /// call so that its notifications are delivered before anything else
    /// happens.
    pub(crate) fn advance(&mut self) -> bool {
        self.finalize_closed_connections()
            || self.factory_step()
            || self.start_transactions()
            || self.execute_next_request()
            || self.auto_commit()
    }

    /// Drops connections whose close is pending and whose transactions
    /// have all finished. Their handles keep a snapshot.
    fn finalize_closed_connections(&mut self) -> bool {
        let ready: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.close_pending)
            .map(|(id, _)| *id)
            .filter(|id| {
                !self
                    .transactions
                    .values()
                    .any(|t| t.connection == *id && !t.state.is_finished())
            })
            .collect();
        for id in &ready {
            if let Some(conn) = self.connections.remove(id) {
                *conn.shared.closed.lock() = Some(ConnectionSnapshot {
                    version: conn.version,
                    store_names: conn.schema.store_names(),
                });
                debug!(connection = %id, "connection closed");
            }
        }
        !ready.is_empty()
    }

    fn start_transactions(&mut self) -> bool {
        let ready = scheduler::startable(&self.transactions);
        for id in &ready {
            if let Some(txn) = self.transactions.get_mut(id) {
                txn.started = true;
                debug!(transaction = %id, mode = %txn.mode, "transaction started");
            }
        }
        !ready.is_empty()
    }

    fn execute_next_request(&mut self) -> bool {
        let next = self
            .transactions
            .values()
            .filter(|t| t.started && !t.state.is_finished())
            .find_map(|t| {
                let request = *t.queue.front()?;
                let notified = self.requests.get(&request)?.lock().notified;
                (!notified).then_some((t.id, request))
            });
        let Some((txn, request)) = next else {
            return false;
        };

        let operation = self
            .requests
            .get(&request)
            .and_then(|r| r.lock().operation.take());
        let outcome = match operation {
            Some(operation) => self.run_operation(txn, operation),
            None => Ok(ResultData::Undefined),
        };

        let internal = self.requests.get(&request).is_some_and(|r| r.lock().internal);
        if internal {
            if let Some(t) = self.transactions.get_mut(&txn) {
                t.queue.retain(|r| *r != request);
            }
            self.requests.remove(&request);
            if let Err(err) = outcome {
                self.abort_transaction(txn, Some(err));
            }
        } else {
            self.resolve(request, outcome);
        }
        true
    }

    fn auto_commit(&mut self) -> bool {
        let ready = self
            .transactions
            .values()
            .find(|t| t.ready_to_commit())
            .map(|t| t.id);
        match ready {
            Some(id) => {
                self.commit_transaction(id);
                true
            }
            None => false,
        }
    }

    /// Forgets a finished transaction and its cursors once its `complete`
    /// or `abort` was delivered. Its handles keep the final state.
    pub(crate) fn release_transaction(&mut self, id: TransactionId) {
        let Some(txn) = self.transactions.remove(&id) else {
            return;
        };
        *txn.shared.outcome.lock() = Some((txn.state, txn.error));
        self.cursors.retain(|_, c| c.transaction != id);
        trace!(transaction = %id, "transaction released");
    }
}
