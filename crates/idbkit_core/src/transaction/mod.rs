//! Transactions.
//!
//! A transaction buffers its writes in a [`overlay::WriteSet`] and applies
//! them as one atomic batch at commit, so:
//! - **Atomicity**: the backend sees all of a transaction's writes or none
//! - **Isolation**: overlapping scopes never run at the same time unless
//!   every participant only reads
//! - **Ordering**: requests complete in the order they were placed

mod handle;
pub(crate) mod overlay;
pub(crate) mod scheduler;
pub(crate) mod view;

pub use handle::Transaction;

use crate::engine::ConnectionShared;
use crate::error::{IdbError, IdbResult};
use crate::event::{Callback, RequestEvent, TransactionEvent};
use crate::schema::DatabaseSchema;
use crate::types::{
    ConnectionId, Durability, RequestId, StoreId, TransactionId, TransactionMode,
    TransactionState,
};
use overlay::WriteSet;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// The object stores a transaction may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Every store of the database (version-change transactions).
    All,
    /// An explicit set of stores.
    Stores(BTreeSet<StoreId>),
}

impl Scope {
    pub(crate) fn stores(ids: impl IntoIterator<Item = StoreId>) -> Self {
        Self::Stores(ids.into_iter().collect())
    }

    pub(crate) fn contains(&self, store: StoreId) -> bool {
        match self {
            Self::All => true,
            Self::Stores(ids) => ids.contains(&store),
        }
    }

    pub(crate) fn overlaps(&self, other: &Scope) -> bool {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => true,
            (Self::Stores(a), Self::Stores(b)) => !a.is_disjoint(b),
        }
    }
}

/// What a version-change transaction restores when it aborts.
pub(crate) struct UpgradeState {
    /// The open request waiting on this upgrade.
    pub(crate) request: RequestId,
    pub(crate) old_version: u64,
    pub(crate) schema_before: DatabaseSchema,
}

/// What a [`Transaction`] handle keeps after the engine drops the record.
#[derive(Debug)]
pub(crate) struct TxnShared {
    pub(crate) id: TransactionId,
    pub(crate) mode: TransactionMode,
    pub(crate) durability: Durability,
    pub(crate) connection: Arc<ConnectionShared>,
    /// Final state and error, set on release.
    pub(crate) outcome: Mutex<Option<(TransactionState, Option<IdbError>)>>,
}

/// Engine-side state of a transaction.
pub(crate) struct TxnRecord {
    pub(crate) id: TransactionId,
    pub(crate) shared: Arc<TxnShared>,
    pub(crate) connection: ConnectionId,
    pub(crate) database: String,
    pub(crate) scope: Scope,
    pub(crate) mode: TransactionMode,
    pub(crate) durability: Durability,
    pub(crate) state: TransactionState,
    /// Granted by the scheduler; requests only execute once started.
    pub(crate) started: bool,
    /// Requests placed and not yet delivered, in order.
    pub(crate) queue: VecDeque<RequestId>,
    pub(crate) writes: WriteSet,
    /// Key generator numbers touched by this transaction.
    pub(crate) key_generators: HashMap<StoreId, f64>,
    pub(crate) error: Option<IdbError>,
    pub(crate) upgrade: Option<UpgradeState>,
    pub(crate) on_complete: Option<Callback<TransactionEvent>>,
    pub(crate) on_abort: Option<Callback<TransactionEvent>>,
    pub(crate) on_error: Option<Callback<RequestEvent>>,
}

impl TxnRecord {
    pub(crate) fn new(
        id: TransactionId,
        connection: Arc<ConnectionShared>,
        scope: Scope,
        mode: TransactionMode,
        durability: Durability,
    ) -> Self {
        let shared = Arc::new(TxnShared {
            id,
            mode,
            durability,
            connection: Arc::clone(&connection),
            outcome: Mutex::new(None),
        });
        Self {
            id,
            shared,
            connection: connection.id,
            database: connection.name.clone(),
            scope,
            mode,
            durability,
            state: TransactionState::Active,
            started: false,
            queue: VecDeque::new(),
            writes: WriteSet::new(),
            key_generators: HashMap::new(),
            error: None,
            upgrade: None,
            on_complete: None,
            on_abort: None,
            on_error: None,
        }
    }

    /// Fails unless new requests may be placed.
    pub(crate) fn ensure_active(&self) -> IdbResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(IdbError::transaction_inactive(format!(
                "transaction {} is not active",
                self.id
            )))
        }
    }

    /// Fails unless the transaction may write.
    pub(crate) fn ensure_writable(&self) -> IdbResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(IdbError::read_only(format!(
                "transaction {} is read-only",
                self.id
            )))
        }
    }

    /// Fails unless this is a running version-change transaction.
    pub(crate) fn ensure_upgrade(&self) -> IdbResult<()> {
        if self.mode != TransactionMode::VersionChange {
            return Err(IdbError::invalid_state(
                "schema changes require a version-change transaction",
            ));
        }
        self.ensure_active()
    }

    /// Whether the transaction can finish on its own.
    ///
    /// True once it is started, no longer accepts requests and has
    /// delivered every request it was given.
    pub(crate) fn ready_to_commit(&self) -> bool {
        self.started
            && matches!(
                self.state,
                TransactionState::Inactive | TransactionState::Committing
            )
            && self.queue.is_empty()
    }
}
