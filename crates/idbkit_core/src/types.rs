//! Core type definitions.

use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Creates an ID from its raw value.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw ID value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a transaction.
    ///
    /// Transaction IDs are monotonically increasing and never reused, so
    /// they also give the creation order the scheduler relies on.
    TransactionId,
    "txn"
);

id_type!(
    /// Identifier for a request.
    RequestId,
    "req"
);

id_type!(
    /// Identifier for an open connection.
    ConnectionId,
    "conn"
);

id_type!(
    /// Identifier for a cursor.
    CursorId,
    "cursor"
);

id_type!(
    /// Identifier for an object store within a database.
    ///
    /// Store IDs are stable across renames and never reused, which keeps
    /// the storage partition of a deleted store from being picked up again.
    StoreId,
    "store"
);

id_type!(
    /// Identifier for an index within a database.
    IndexId,
    "index"
);

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only; may run alongside other readers.
    ReadOnly,
    /// Reads and writes records.
    ReadWrite,
    /// Schema upgrade; created only by `open`.
    VersionChange,
}

impl TransactionMode {
    /// Whether this mode may modify records.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
            Self::VersionChange => "versionchange",
        })
    }
}

/// Durability hint for a transaction's commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Durability {
    /// Follow [`crate::Config::sync_on_commit`].
    #[default]
    Default,
    /// Always sync the backend after the commit.
    Strict,
    /// Never sync; only flush.
    Relaxed,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Requests may be placed.
    Active,
    /// Waiting for queued requests; new requests are rejected.
    Inactive,
    /// Commit requested; the remaining requests are drained first.
    Committing,
    /// All changes are durable.
    Committed,
    /// All changes were discarded.
    Aborted,
}

impl TransactionState {
    /// Whether the transaction has finished.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// Iteration direction of a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CursorDirection {
    /// Ascending, every entry.
    #[default]
    Next,
    /// Ascending, first entry of each distinct key.
    NextUnique,
    /// Descending, every entry.
    Prev,
    /// Descending, first entry of each distinct key.
    PrevUnique,
}

impl CursorDirection {
    /// Whether the cursor moves towards lower keys.
    #[must_use]
    pub fn is_reverse(self) -> bool {
        matches!(self, Self::Prev | Self::PrevUnique)
    }

    /// Whether duplicate keys are skipped.
    #[must_use]
    pub fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }
}

/// Whether a request is still waiting for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Result not available yet.
    Pending,
    /// Result or error available.
    Done,
}

/// Name and version of a stored database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
}

/// The highest version a database may have (2^53 - 1).
pub const MAX_VERSION: u64 = (1 << 53) - 1;
