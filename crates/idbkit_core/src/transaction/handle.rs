use crate::database::Database;
use crate::engine::SharedEngine;
use crate::error::{IdbError, IdbResult};
use crate::event::{RequestEvent, TransactionEvent};
use crate::object_store::ObjectStore;
use crate::transaction::TxnShared;
use crate::types::{Durability, TransactionId, TransactionMode, TransactionState};
use std::sync::Arc;

/// Handle to a transaction.
///
/// A transaction accepts requests while it is active: during the turn in
/// which it was created and while one of its request callbacks runs. Once
/// it has no more requests to deliver and is inactive it commits on its
/// own. Its final state and error stay readable after it finished.
#[derive(Clone)]
pub struct Transaction {
    engine: SharedEngine,
    shared: Arc<TxnShared>,
    id: TransactionId,
}

impl Transaction {
    pub(crate) fn new(engine: SharedEngine, shared: Arc<TxnShared>) -> Self {
        Self {
            engine,
            id: shared.id,
            shared,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Opens an object store in the transaction's scope.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` once the transaction has finished
    /// - `NotFoundError` when the store is not in scope
    pub fn object_store(&self, name: &str) -> IdbResult<ObjectStore> {
        let engine = self.engine.lock();
        let txn = engine.txn(self.id)?;
        if txn.state.is_finished() {
            return Err(IdbError::invalid_state(format!(
                "transaction {} has finished",
                self.id
            )));
        }
        let store = engine
            .txn_schema(self.id)?
            .store_by_name(name)
            .filter(|s| txn.scope.contains(s.id))
            .ok_or_else(|| IdbError::not_found(format!("no object store named {name:?} in scope")))?;
        Ok(ObjectStore::new(self.engine.clone(), Arc::clone(&self.shared), store.id))
    }

    /// Names of the stores in scope, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        let engine = self.engine.lock();
        let (Ok(txn), Ok(schema)) = (engine.txn(self.id), engine.txn_schema(self.id)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = schema
            .stores()
            .filter(|s| txn.scope.contains(s.id))
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Aborts the transaction, discarding every change it made.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` when the transaction has already finished.
    pub fn abort(&self) -> IdbResult<()> {
        self.engine.lock().request_abort(self.id)
    }

    /// Stops accepting requests and commits once the queued ones are done.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` unless the transaction is active.
    pub fn commit(&self) -> IdbResult<()> {
        self.engine.lock().request_commit(self.id)
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    /// Durability hint given at creation.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.shared.durability
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        let engine = self.engine.lock();
        match engine.txn(self.id) {
            Ok(txn) => txn.state,
            Err(_) => self
                .shared
                .outcome
                .lock()
                .as_ref()
                .map_or(TransactionState::Aborted, |(state, _)| *state),
        }
    }

    /// Why the transaction aborted, if it aborted because of an error.
    #[must_use]
    pub fn error(&self) -> Option<IdbError> {
        let engine = self.engine.lock();
        match engine.txn(self.id) {
            Ok(txn) => txn.error.clone(),
            Err(_) => self.shared.outcome.lock().as_ref()?.1.clone(),
        }
    }

    /// The connection the transaction was created on.
    #[must_use]
    pub fn db(&self) -> Option<Database> {
        Some(Database::new(
            self.engine.clone(),
            Arc::clone(&self.shared.connection),
        ))
    }

    /// Registers the `complete` handler.
    pub fn on_complete(&self, callback: impl FnMut(&TransactionEvent) + Send + 'static) {
        if let Ok(txn) = self.engine.lock().txn_mut(self.id) {
            txn.on_complete = Some(Box::new(callback));
        }
    }

    /// Registers the `abort` handler.
    pub fn on_abort(&self, callback: impl FnMut(&TransactionEvent) + Send + 'static) {
        if let Ok(txn) = self.engine.lock().txn_mut(self.id) {
            txn.on_abort = Some(Box::new(callback));
        }
    }

    /// Registers the handler request errors bubble to.
    ///
    /// Calling [`RequestEvent::prevent_default`] in either the request's or
    /// this handler keeps the transaction alive.
    pub fn on_error(&self, callback: impl FnMut(&RequestEvent) + Send + 'static) {
        if let Ok(txn) = self.engine.lock().txn_mut(self.id) {
            txn.on_error = Some(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
