//! Events delivered to callbacks.
//!
//! Callbacks are plain boxed closures registered on requests,
//! transactions and connections. The engine never holds its lock while a
//! callback runs, so callbacks may freely place new requests, open
//! transactions or close connections.

use crate::database::Database;
use crate::error::IdbError;
use crate::request::{Request, RequestResult};
use crate::transaction::Transaction;
use std::cell::Cell;

/// A registered event handler.
pub(crate) type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// Delivered to `on_success` and `on_error` handlers of a request, and to
/// a transaction's `on_error` handler when a request error bubbles up.
pub struct RequestEvent {
    request: Request,
    error: Option<IdbError>,
    prevented: Cell<bool>,
}

impl RequestEvent {
    pub(crate) fn new(request: Request, error: Option<IdbError>) -> Self {
        Self {
            request,
            error,
            prevented: Cell::new(false),
        }
    }

    /// The request that completed.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request's result; `None` for error events.
    #[must_use]
    pub fn result(&self) -> Option<RequestResult> {
        self.request.result()
    }

    /// The error, for error events.
    #[must_use]
    pub fn error(&self) -> Option<&IdbError> {
        self.error.as_ref()
    }

    /// The transaction the request belongs to.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        self.request.transaction()
    }

    /// Keeps an error from aborting the transaction.
    pub fn prevent_default(&self) {
        self.prevented.set(true);
    }

    /// Whether [`RequestEvent::prevent_default`] was called.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.prevented.get()
    }
}

/// Delivered for `upgradeneeded`, `blocked` and `versionchange`.
pub struct VersionChangeEvent {
    old_version: u64,
    new_version: Option<u64>,
    database: Option<Database>,
    transaction: Option<Transaction>,
}

impl VersionChangeEvent {
    pub(crate) fn new(
        old_version: u64,
        new_version: Option<u64>,
        database: Option<Database>,
        transaction: Option<Transaction>,
    ) -> Self {
        Self {
            old_version,
            new_version,
            database,
            transaction,
        }
    }

    /// The version before the change.
    #[must_use]
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// The requested version; `None` when the database is being deleted.
    #[must_use]
    pub fn new_version(&self) -> Option<u64> {
        self.new_version
    }

    /// For `upgradeneeded`, the connection being upgraded; for
    /// `versionchange`, the connection asked to close.
    #[must_use]
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// The version-change transaction, for `upgradeneeded`.
    #[must_use]
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }
}

/// Delivered to `on_complete` and `on_abort` handlers of a transaction.
pub struct TransactionEvent {
    transaction: Transaction,
    error: Option<IdbError>,
}

impl TransactionEvent {
    pub(crate) fn new(transaction: Transaction, error: Option<IdbError>) -> Self {
        Self { transaction, error }
    }

    /// The transaction that finished.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Why the transaction aborted; `None` for completion and explicit
    /// aborts.
    #[must_use]
    pub fn error(&self) -> Option<&IdbError> {
        self.error.as_ref()
    }
}
