//! Requests: handles for asynchronous operations.

use crate::cursor::Cursor;
use crate::database::Database;
use crate::engine::{ConnectionShared, SharedEngine};
use crate::error::{IdbError, IdbResult};
use crate::event::{Callback, RequestEvent, VersionChangeEvent};
use crate::transaction::{Transaction, TxnShared};
use crate::types::{CursorId, DatabaseInfo, IndexId, ReadyState, RequestId, StoreId};
use idbkit_codec::{Key, KeyRange, Value};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// What a store or index read produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadKind {
    Value,
    Key,
    Values(Option<u32>),
    Keys(Option<u32>),
    Count,
}

/// Where a read looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Store(StoreId),
    Index(StoreId, IndexId),
}

impl Source {
    pub(crate) fn store(self) -> StoreId {
        match self {
            Self::Store(store) | Self::Index(store, _) => store,
        }
    }
}

/// A queued operation, validated when it was placed.
#[derive(Debug)]
pub(crate) enum Operation {
    Read {
        source: Source,
        range: KeyRange,
        kind: ReadKind,
    },
    Put {
        store: StoreId,
        value: Value,
        /// Explicit or extracted key; generated when `None`.
        key: Option<Key>,
        no_overwrite: bool,
    },
    Delete {
        store: StoreId,
        range: KeyRange,
    },
    Clear {
        store: StoreId,
    },
    Iterate {
        cursor: CursorId,
    },
    PopulateIndex {
        store: StoreId,
        index: IndexId,
    },
}

/// Engine-side result of a request.
///
/// Nothing here refers back to the engine, so the engine never owns an
/// `Arc` to itself.
#[derive(Debug, Clone)]
pub(crate) enum ResultData {
    Undefined,
    Value(Value),
    Key(Key),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Option<CursorId>),
    Database(Arc<ConnectionShared>),
    Databases(Vec<DatabaseInfo>),
    Version(u64),
}

/// A request record shared by the engine and the request's handles.
///
/// The engine holds it only while the request is in flight; the handles
/// keep the delivered result.
pub(crate) type SharedRequest = Arc<Mutex<RequestRecord>>;

/// State of a request.
pub(crate) struct RequestRecord {
    pub(crate) id: RequestId,
    pub(crate) transaction: Option<Arc<TxnShared>>,
    pub(crate) operation: Option<Operation>,
    pub(crate) ready: ReadyState,
    /// Computed outcome awaiting delivery.
    pub(crate) outcome: Option<IdbResult<ResultData>>,
    /// A delivery notification is queued.
    pub(crate) notified: bool,
    /// Resolved by a transaction abort rather than by its operation.
    pub(crate) cancelled: bool,
    /// Engine bookkeeping with no handle; failures abort the transaction.
    pub(crate) internal: bool,
    pub(crate) result: Option<ResultData>,
    pub(crate) error: Option<IdbError>,
    pub(crate) on_success: Option<Callback<RequestEvent>>,
    pub(crate) on_error: Option<Callback<RequestEvent>>,
    pub(crate) on_upgrade_needed: Option<Callback<VersionChangeEvent>>,
    pub(crate) on_blocked: Option<Callback<VersionChangeEvent>>,
}

impl RequestRecord {
    pub(crate) fn new(
        id: RequestId,
        transaction: Option<Arc<TxnShared>>,
        operation: Option<Operation>,
    ) -> Self {
        Self {
            id,
            transaction,
            operation,
            ready: ReadyState::Pending,
            outcome: None,
            notified: false,
            cancelled: false,
            internal: false,
            result: None,
            error: None,
            on_success: None,
            on_error: None,
            on_upgrade_needed: None,
            on_blocked: None,
        }
    }

    /// Stores the outcome for delivery; moves nothing into view yet.
    pub(crate) fn resolve(&mut self, outcome: IdbResult<ResultData>) {
        self.outcome = Some(outcome);
        self.notified = true;
    }

    /// Makes the stored outcome visible through the handle.
    ///
    /// Returns the error, if the request failed.
    pub(crate) fn deliver(&mut self) -> Option<IdbError> {
        self.ready = ReadyState::Done;
        self.notified = false;
        match self.outcome.take() {
            Some(Ok(data)) => {
                self.result = Some(data);
                self.error = None;
                None
            }
            Some(Err(err)) => {
                self.result = None;
                self.error = Some(err.clone());
                Some(err)
            }
            None => {
                self.result = Some(ResultData::Undefined);
                None
            }
        }
    }
}

/// The result of a successful request.
#[derive(Clone)]
pub enum RequestResult {
    /// No value (`undefined`), e.g. a `get` that found nothing or a `delete`.
    Undefined,
    /// A record value.
    Value(Value),
    /// A key, e.g. from `put` or `get_key`.
    Key(Key),
    /// Record values from `get_all`.
    Values(Vec<Value>),
    /// Keys from `get_all_keys`.
    Keys(Vec<Key>),
    /// A record count.
    Count(u64),
    /// A cursor positioned on a record, or `None` once iteration ended.
    Cursor(Option<Cursor>),
    /// An open connection.
    Database(Database),
    /// Stored databases.
    Databases(Vec<DatabaseInfo>),
    /// The version of a deleted database.
    Version(u64),
}

impl RequestResult {
    pub(crate) fn from_data(data: ResultData, request: &Request) -> Self {
        let engine = &request.engine;
        match data {
            ResultData::Undefined => Self::Undefined,
            ResultData::Value(value) => Self::Value(value),
            ResultData::Key(key) => Self::Key(key),
            ResultData::Values(values) => Self::Values(values),
            ResultData::Keys(keys) => Self::Keys(keys),
            ResultData::Count(count) => Self::Count(count),
            ResultData::Cursor(cursor) => {
                Self::Cursor(cursor.map(|id| Cursor::new(engine.clone(), id, request.clone())))
            }
            ResultData::Database(shared) => Self::Database(Database::new(engine.clone(), shared)),
            ResultData::Databases(infos) => Self::Databases(infos),
            ResultData::Version(version) => Self::Version(version),
        }
    }

    /// Whether this is [`RequestResult::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// The record value, if this is one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The key, if this is one.
    #[must_use]
    pub fn into_key(self) -> Option<Key> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }

    /// The values, if this is a list of values.
    #[must_use]
    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            Self::Values(values) => Some(values),
            _ => None,
        }
    }

    /// The keys, if this is a list of keys.
    #[must_use]
    pub fn into_keys(self) -> Option<Vec<Key>> {
        match self {
            Self::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    /// The count, if this is one.
    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(count) => Some(*count),
            _ => None,
        }
    }

    /// The cursor, if it is positioned on a record.
    #[must_use]
    pub fn into_cursor(self) -> Option<Cursor> {
        match self {
            Self::Cursor(cursor) => cursor,
            _ => None,
        }
    }

    /// The connection, if this is one.
    #[must_use]
    pub fn into_database(self) -> Option<Database> {
        match self {
            Self::Database(db) => Some(db),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RequestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Key(k) => f.debug_tuple("Key").field(k).finish(),
            Self::Values(v) => f.debug_tuple("Values").field(v).finish(),
            Self::Keys(k) => f.debug_tuple("Keys").field(k).finish(),
            Self::Count(c) => f.debug_tuple("Count").field(c).finish(),
            Self::Cursor(c) => f
                .debug_tuple("Cursor")
                .field(&c.as_ref().map(Cursor::id))
                .finish(),
            Self::Database(db) => f.debug_tuple("Database").field(&db.name()).finish(),
            Self::Databases(d) => f.debug_tuple("Databases").field(d).finish(),
            Self::Version(v) => f.debug_tuple("Version").field(v).finish(),
        }
    }
}

/// A pending or completed operation.
///
/// Exactly one of `on_success` and `on_error` fires for each completion.
/// Handlers registered after the request completed are not called.
#[derive(Clone)]
pub struct Request {
    pub(crate) engine: SharedEngine,
    pub(crate) record: SharedRequest,
    id: RequestId,
}

impl Request {
    pub(crate) fn new(engine: SharedEngine, record: SharedRequest) -> Self {
        let id = record.lock().id;
        Self { engine, record, id }
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Whether the request has completed.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.record.lock().ready
    }

    /// The result, once the request succeeded.
    #[must_use]
    pub fn result(&self) -> Option<RequestResult> {
        let data = self.record.lock().result.clone()?;
        Some(RequestResult::from_data(data, self))
    }

    /// The error, once the request failed.
    #[must_use]
    pub fn error(&self) -> Option<IdbError> {
        self.record.lock().error.clone()
    }

    /// The transaction the request was placed against.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        let shared = self.record.lock().transaction.clone()?;
        Some(Transaction::new(self.engine.clone(), shared))
    }

    /// Registers the success handler, replacing any previous one.
    pub fn on_success(&self, callback: impl FnMut(&RequestEvent) + Send + 'static) {
        self.record.lock().on_success = Some(Box::new(callback));
    }

    /// Registers the error handler, replacing any previous one.
    pub fn on_error(&self, callback: impl FnMut(&RequestEvent) + Send + 'static) {
        self.record.lock().on_error = Some(Box::new(callback));
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").field("id", &self.id).finish()
    }
}

/// The request returned by `open` and `delete_database`.
///
/// Besides the usual completion handlers it reports `upgradeneeded` and
/// `blocked`.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    request: Request,
}

impl OpenRequest {
    pub(crate) fn new(engine: SharedEngine, record: SharedRequest) -> Self {
        Self {
            request: Request::new(engine, record),
        }
    }

    /// Registers the `upgradeneeded` handler.
    ///
    /// The event carries the new connection and the version-change
    /// transaction in which stores and indexes may be changed.
    pub fn on_upgrade_needed(&self, callback: impl FnMut(&VersionChangeEvent) + Send + 'static) {
        self.request.record.lock().on_upgrade_needed = Some(Box::new(callback));
    }

    /// Registers the `blocked` handler, fired when other connections stay
    /// open after being asked to close.
    pub fn on_blocked(&self, callback: impl FnMut(&VersionChangeEvent) + Send + 'static) {
        self.request.record.lock().on_blocked = Some(Box::new(callback));
    }
}

impl Deref for OpenRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_moves_outcome_into_view() {
        let mut record = RequestRecord::new(RequestId::new(1), None, None);
        record.resolve(Ok(ResultData::Count(3)));
        assert!(record.notified);
        assert_eq!(record.ready, ReadyState::Pending);

        assert!(record.deliver().is_none());
        assert_eq!(record.ready, ReadyState::Done);
        assert!(matches!(record.result, Some(ResultData::Count(3))));
    }

    #[test]
    fn deliver_reports_errors() {
        let mut record = RequestRecord::new(RequestId::new(1), None, None);
        record.resolve(Err(IdbError::constraint("dup")));
        let err = record.deliver().unwrap();
        assert_eq!(err.name(), "ConstraintError");
        assert!(record.result.is_none());
        assert!(record.error.is_some());
    }

    #[test]
    fn source_store() {
        assert_eq!(
            Source::Index(StoreId::new(2), IndexId::new(5)).store(),
            StoreId::new(2)
        );
    }
}
