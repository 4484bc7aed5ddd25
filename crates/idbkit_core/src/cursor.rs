//! Cursors over stores and indexes.
//!
//! A cursor remembers its position as decoded keys and re-seeks the
//! merged transaction view on every step, so writes made between steps
//! are always observed. For index cursors the position is the pair
//! `(index key, primary key)`, which is exactly the composite entry key.

use crate::engine::{Engine, SharedEngine};
use crate::error::{IdbError, IdbResult};
use crate::request::{Operation, Request, ResultData, SharedRequest};
use crate::schema::{index_partition, store_partition};
use crate::transaction::overlay::{max_lower, min_upper};
use crate::transaction::view::TxnView;
use crate::types::{CursorDirection, CursorId, IndexId, StoreId, TransactionId};
use idbkit_codec::{
    decode_key, decode_key_prefix, deserialize_value, encode_key, extract_key, prefix_successor,
    Key, KeyRange, Value,
};
use idbkit_storage::{ScanDirection, ScanRange};
use std::ops::Bound;

/// What the next iteration of a cursor should do.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    /// Move once, optionally to at least `key` (and `primary_key`).
    Continue {
        key: Option<Key>,
        primary_key: Option<Key>,
    },
    /// Move `n` times.
    Advance(u32),
}

/// Engine-side state of a cursor.
#[derive(Debug)]
pub(crate) struct CursorState {
    pub(crate) transaction: TransactionId,
    pub(crate) store: StoreId,
    pub(crate) index: Option<IndexId>,
    pub(crate) direction: CursorDirection,
    pub(crate) range: KeyRange,
    pub(crate) key_only: bool,
    pub(crate) key: Option<Key>,
    pub(crate) primary_key: Option<Key>,
    pub(crate) value: Option<Value>,
    /// Positioned on a record and not yet asked to move.
    pub(crate) got_value: bool,
    pub(crate) pending: Pending,
}

impl CursorState {
    pub(crate) fn new(
        transaction: TransactionId,
        store: StoreId,
        index: Option<IndexId>,
        direction: CursorDirection,
        range: KeyRange,
        key_only: bool,
    ) -> Self {
        Self {
            transaction,
            store,
            index,
            direction,
            range,
            key_only,
            key: None,
            primary_key: None,
            value: None,
            got_value: false,
            pending: Pending::Continue {
                key: None,
                primary_key: None,
            },
        }
    }

    fn scan_direction(&self) -> ScanDirection {
        if self.direction.is_reverse() {
            ScanDirection::Reverse
        } else {
            ScanDirection::Forward
        }
    }
}

fn composite(key: &Key, primary_key: &Key) -> Vec<u8> {
    let mut bytes = encode_key(key);
    bytes.extend_from_slice(&encode_key(primary_key));
    bytes
}

impl Engine {
    pub(crate) fn cursor(&self, id: CursorId) -> IdbResult<&CursorState> {
        self.cursors
            .get(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown cursor {id}")))
    }

    pub(crate) fn cursor_mut(&mut self, id: CursorId) -> IdbResult<&mut CursorState> {
        self.cursors
            .get_mut(&id)
            .ok_or_else(|| IdbError::invalid_state(format!("unknown cursor {id}")))
    }

    /// Runs one iteration request of a cursor.
    pub(crate) fn iterate_cursor(&mut self, txn: TransactionId, id: CursorId) -> IdbResult<ResultData> {
        let pending = std::mem::replace(
            &mut self.cursor_mut(id)?.pending,
            Pending::Continue {
                key: None,
                primary_key: None,
            },
        );
        let (steps, key, primary_key) = match pending {
            Pending::Continue { key, primary_key } => (1, key, primary_key),
            Pending::Advance(n) => (n, None, None),
        };

        let mut found = None;
        for step in 0..steps {
            let (target, primary_target) = if step == 0 {
                (key.as_ref(), primary_key.as_ref())
            } else {
                (None, None)
            };
            found = self.cursor_step(txn, id, target, primary_target)?;
            let cursor = self.cursor_mut(id)?;
            match &found {
                Some((key, primary)) => {
                    cursor.key = Some(key.clone());
                    cursor.primary_key = Some(primary.clone());
                }
                None => break,
            }
        }

        let value = match (&found, self.cursor(id)?.key_only) {
            (Some((_, primary)), false) => {
                let record = self.txn(txn)?;
                let partition = store_partition(&record.database, self.cursor(id)?.store);
                let view = TxnView::new(self.backend.as_ref(), &record.writes);
                match view.get(&partition, &encode_key(primary))? {
                    Some(bytes) => Some(deserialize_value(&bytes)?),
                    None => {
                        return Err(IdbError::unknown(format!(
                            "index entry points at missing record {primary}"
                        )))
                    }
                }
            }
            _ => None,
        };

        let cursor = self.cursor_mut(id)?;
        if found.is_some() {
            cursor.value = value;
            cursor.got_value = true;
            Ok(ResultData::Cursor(Some(id)))
        } else {
            cursor.key = None;
            cursor.primary_key = None;
            cursor.value = None;
            cursor.got_value = false;
            Ok(ResultData::Cursor(None))
        }
    }

    /// Finds the next `(key, primary key)` after the cursor's position.
    fn cursor_step(
        &self,
        txn: TransactionId,
        id: CursorId,
        target: Option<&Key>,
        primary_target: Option<&Key>,
    ) -> IdbResult<Option<(Key, Key)>> {
        let cursor = self.cursor(id)?;
        let schema = self.store_schema(txn, cursor.store)?;
        let record = self.txn(txn)?;
        let view = TxnView::new(self.backend.as_ref(), &record.writes);
        let direction = cursor.scan_direction();

        let Some(index) = cursor.index else {
            let (mut lower, mut upper) = cursor.range.to_bounds();
            let mut bounds = Vec::new();
            if let Some(position) = &cursor.key {
                bounds.push(Bound::Excluded(encode_key(position)));
            }
            if let Some(target) = target {
                bounds.push(Bound::Included(encode_key(target)));
            }
            for bound in bounds {
                match direction {
                    ScanDirection::Forward => lower = max_lower(lower, bound),
                    ScanDirection::Reverse => upper = min_upper(upper, bound),
                }
            }
            let partition = store_partition(&record.database, cursor.store);
            let entry = view
                .scan(&partition, &ScanRange::new(lower, upper), direction, Some(1))?
                .into_iter()
                .next();
            return match entry {
                Some((key, _)) => {
                    let key = decode_key(&key)?;
                    Ok(Some((key.clone(), key)))
                }
                None => Ok(None),
            };
        };

        if !schema.indexes.contains_key(&index) {
            return Err(IdbError::invalid_state("the index has been deleted"));
        }
        let partition = index_partition(&record.database, index);
        let (mut lower, mut upper) = cursor.range.to_index_bounds();
        let position = cursor.key.as_ref().zip(cursor.primary_key.as_ref());

        match cursor.direction {
            CursorDirection::Next => {
                if let Some((key, primary)) = position {
                    lower = max_lower(lower, Bound::Excluded(composite(key, primary)));
                }
                if let Some(target) = target {
                    let bound = match primary_target {
                        Some(primary) => composite(target, primary),
                        None => encode_key(target),
                    };
                    lower = max_lower(lower, Bound::Included(bound));
                }
            }
            CursorDirection::NextUnique => {
                if let Some((key, _)) = position {
                    match prefix_successor(&encode_key(key)) {
                        Some(next) => lower = max_lower(lower, Bound::Included(next)),
                        None => return Ok(None),
                    }
                }
                if let Some(target) = target {
                    lower = max_lower(lower, Bound::Included(encode_key(target)));
                }
            }
            CursorDirection::Prev => {
                if let Some((key, primary)) = position {
                    upper = min_upper(upper, Bound::Excluded(composite(key, primary)));
                }
                if let Some(target) = target {
                    let bound = match primary_target {
                        Some(primary) => Some(Bound::Included(composite(target, primary))),
                        None => prefix_successor(&encode_key(target)).map(Bound::Excluded),
                    };
                    if let Some(bound) = bound {
                        upper = min_upper(upper, bound);
                    }
                }
            }
            CursorDirection::PrevUnique => {
                if let Some((key, _)) = position {
                    upper = min_upper(upper, Bound::Excluded(encode_key(key)));
                }
                if let Some(next) = target.and_then(|t| prefix_successor(&encode_key(t))) {
                    upper = min_upper(upper, Bound::Excluded(next));
                }
            }
        }

        let Some((entry, primary)) = view
            .scan(&partition, &ScanRange::new(lower, upper), direction, Some(1))?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let (key, consumed) = decode_key_prefix(&entry)?;

        if cursor.direction == CursorDirection::PrevUnique {
            // Land on the first entry of that index key.
            let first = ScanRange::new(
                Bound::Included(entry[..consumed].to_vec()),
                Bound::Included(entry.clone()),
            );
            if let Some((_, primary)) = view
                .scan(&partition, &first, ScanDirection::Forward, Some(1))?
                .into_iter()
                .next()
            {
                return Ok(Some((key, decode_key(&primary)?)));
            }
        }
        Ok(Some((key, decode_key(&primary)?)))
    }
}

/// A cursor positioned within a store or index.
///
/// The cursor's request fires `on_success` once per position; inside that
/// handler call [`Cursor::continue_key`] or [`Cursor::advance`] to move on.
/// When iteration ends the request's result is `Cursor(None)`.
#[derive(Clone)]
pub struct Cursor {
    engine: SharedEngine,
    id: CursorId,
    request: Request,
}

impl Cursor {
    pub(crate) fn new(engine: SharedEngine, id: CursorId, request: Request) -> Self {
        Self {
            engine,
            id,
            request,
        }
    }

    /// Cursor id.
    #[must_use]
    pub fn id(&self) -> CursorId {
        self.id
    }

    /// Current key: the index key for index cursors.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.engine.lock().cursors.get(&self.id)?.key.clone()
    }

    /// Current primary key.
    #[must_use]
    pub fn primary_key(&self) -> Option<Key> {
        self.engine.lock().cursors.get(&self.id)?.primary_key.clone()
    }

    /// Current record value; `None` for key cursors.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.engine.lock().cursors.get(&self.id)?.value.clone()
    }

    /// Iteration direction.
    #[must_use]
    pub fn direction(&self) -> CursorDirection {
        self.engine
            .lock()
            .cursors
            .get(&self.id)
            .map_or(CursorDirection::Next, |c| c.direction)
    }

    /// The request that delivers this cursor's positions.
    #[must_use]
    pub fn request(&self) -> Request {
        self.request.clone()
    }

    /// Moves `count` positions forward in the cursor's direction.
    ///
    /// # Errors
    ///
    /// `TypeError` for a zero count, plus the errors of
    /// [`Cursor::continue_key`].
    pub fn advance(&self, count: u32) -> IdbResult<()> {
        if count == 0 {
            return Err(IdbError::type_error("advance count must be positive"));
        }
        let mut engine = self.engine.lock();
        check_movable(&engine, self.id)?;
        move_cursor(&mut engine, self.id, &self.request.record, Pending::Advance(count))
    }

    /// Moves to the next position, or to the first at or beyond `key`.
    ///
    /// # Errors
    ///
    /// - `TransactionInactiveError` outside the transaction's active time
    /// - `InvalidStateError` when the source was deleted or the cursor is
    ///   already moving or finished
    /// - `DataError` when `key` is not beyond the current position
    pub fn continue_key(&self, key: Option<Key>) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let cursor = check_movable(&engine, self.id)?;
        if let (Some(target), Some(position)) = (&key, &cursor.key) {
            let behind = if cursor.direction.is_reverse() {
                target >= position
            } else {
                target <= position
            };
            if behind {
                return Err(IdbError::data(format!(
                    "key {target} is not beyond the cursor position {position}"
                )));
            }
        }
        move_cursor(
            &mut engine,
            self.id,
            &self.request.record,
            Pending::Continue {
                key,
                primary_key: None,
            },
        )
    }

    /// Moves an index cursor to the first entry at or beyond
    /// `(key, primary_key)`.
    ///
    /// # Errors
    ///
    /// `InvalidAccessError` for store cursors and unique directions,
    /// `DataError` when the target is not beyond the current position, plus
    /// the errors of [`Cursor::continue_key`].
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> IdbResult<()> {
        let mut engine = self.engine.lock();
        let cursor = check_movable(&engine, self.id)?;
        if cursor.index.is_none() {
            return Err(IdbError::invalid_access(
                "continue_primary_key needs an index cursor",
            ));
        }
        if cursor.direction.is_unique() {
            return Err(IdbError::invalid_access(
                "continue_primary_key needs a next or prev cursor",
            ));
        }
        if let (Some(position), Some(object_position)) = (&cursor.key, &cursor.primary_key) {
            let behind = if cursor.direction.is_reverse() {
                key > *position || (key == *position && primary_key >= *object_position)
            } else {
                key < *position || (key == *position && primary_key <= *object_position)
            };
            if behind {
                return Err(IdbError::data(
                    "target is not beyond the cursor position",
                ));
            }
        }
        move_cursor(
            &mut engine,
            self.id,
            &self.request.record,
            Pending::Continue {
                key: Some(key),
                primary_key: Some(primary_key),
            },
        )
    }

    /// Replaces the record at the cursor's position.
    ///
    /// # Errors
    ///
    /// - `ReadOnlyError` in a read-only transaction
    /// - `InvalidStateError` for key cursors or when not positioned
    /// - `DataError` when the value's in-line key differs from the
    ///   primary key
    /// - `DataCloneError` when the value cannot be cloned
    pub fn update(&self, value: &Value) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let (txn, store, primary) = check_writable(&engine, self.id)?;
        let schema = engine.store_schema(txn, store)?;
        let value = value.structured_clone().map_err(IdbError::from_input)?;
        if let Some(path) = &schema.key_path {
            let inline = extract_key(&value, path).map_err(IdbError::from_input)?;
            if inline.as_ref() != Some(&primary) {
                return Err(IdbError::data(
                    "the value's key does not match the cursor's primary key",
                ));
            }
        }
        let record = engine.place(
            txn,
            Operation::Put {
                store,
                value,
                key: Some(primary),
                no_overwrite: false,
            },
        )?;
        Ok(Request::new(self.engine.clone(), record))
    }

    /// Deletes the record at the cursor's position.
    ///
    /// # Errors
    ///
    /// As for [`Cursor::update`], except for the key checks.
    pub fn delete(&self) -> IdbResult<Request> {
        let mut engine = self.engine.lock();
        let (txn, store, primary) = check_writable(&engine, self.id)?;
        let record = engine.place(
            txn,
            Operation::Delete {
                store,
                range: KeyRange::only(primary),
            },
        )?;
        Ok(Request::new(self.engine.clone(), record))
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("id", &self.id).finish()
    }
}

/// Shared checks before a cursor may move.
fn check_movable(engine: &Engine, id: CursorId) -> IdbResult<&CursorState> {
    let cursor = engine.cursor(id)?;
    let schema = engine.check_request(cursor.transaction, cursor.store)?;
    if let Some(index) = cursor.index {
        if !schema.indexes.contains_key(&index) {
            return Err(IdbError::invalid_state("the index has been deleted"));
        }
    }
    if !cursor.got_value {
        return Err(IdbError::invalid_state(
            "the cursor is already moving or has finished",
        ));
    }
    Ok(cursor)
}

fn move_cursor(
    engine: &mut Engine,
    id: CursorId,
    request: &SharedRequest,
    pending: Pending,
) -> IdbResult<()> {
    let cursor = engine.cursor_mut(id)?;
    cursor.got_value = false;
    cursor.pending = pending;
    engine.requeue(request, Operation::Iterate { cursor: id })
}

fn check_writable(engine: &Engine, id: CursorId) -> IdbResult<(TransactionId, StoreId, Key)> {
    let cursor = engine.cursor(id)?;
    let txn = cursor.transaction;
    engine.check_request(txn, cursor.store)?;
    engine.txn(txn)?.ensure_writable()?;
    if cursor.key_only {
        return Err(IdbError::invalid_state("key cursors cannot modify records"));
    }
    match (&cursor.primary_key, cursor.got_value) {
        (Some(primary), true) => Ok((txn, cursor.store, primary.clone())),
        _ => Err(IdbError::invalid_state("the cursor is not positioned on a record")),
    }
}
