//! Error types for the engine.

use idbkit_codec::CodecError;
use idbkit_storage::StorageError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for engine operations.
pub type IdbResult<T> = Result<T, IdbError>;

/// Errors raised by the engine.
///
/// Each variant corresponds to a DOM exception name, available through
/// [`IdbError::name`]. Errors are cheap to clone because they are handed to
/// every request, event and transaction that observes them.
#[derive(Debug, Clone, Error)]
pub enum IdbError {
    /// A key or key range is invalid, or a key could not be produced.
    #[error("DataError: {message}")]
    Data {
        /// Description of the failure.
        message: String,
    },

    /// A key path is syntactically invalid.
    #[error("SyntaxError: {message}")]
    Syntax {
        /// Description of the failure.
        message: String,
    },

    /// A lower version was requested than the one stored.
    #[error("VersionError: {message}")]
    Version {
        /// Description of the failure.
        message: String,
    },

    /// A request was placed against a transaction that is not active.
    #[error("TransactionInactiveError: {message}")]
    TransactionInactive {
        /// Description of the failure.
        message: String,
    },

    /// The object is in the wrong state for the operation.
    #[error("InvalidStateError: {message}")]
    InvalidState {
        /// Description of the failure.
        message: String,
    },

    /// A uniqueness or no-overwrite constraint was violated.
    #[error("ConstraintError: {message}")]
    Constraint {
        /// Description of the failure.
        message: String,
    },

    /// A named store or index does not exist.
    #[error("NotFoundError: {message}")]
    NotFound {
        /// Description of the failure.
        message: String,
    },

    /// A mutation was attempted in a read-only transaction.
    #[error("ReadOnlyError: {message}")]
    ReadOnly {
        /// Description of the failure.
        message: String,
    },

    /// The operation is not supported for this object.
    #[error("InvalidAccessError: {message}")]
    InvalidAccess {
        /// Description of the failure.
        message: String,
    },

    /// The transaction was aborted.
    #[error("AbortError: {message}")]
    Abort {
        /// Description of the failure.
        message: String,
    },

    /// The value could not be cloned for storage.
    #[error("DataCloneError: {message}")]
    DataClone {
        /// Description of the failure.
        message: String,
    },

    /// An argument has the wrong type or is out of range.
    #[error("TypeError: {message}")]
    Type {
        /// Description of the failure.
        message: String,
    },

    /// An internal failure not covered by the other variants.
    #[error("UnknownError: {message}")]
    Unknown {
        /// Description of the failure.
        message: String,
    },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(Arc<StorageError>),

    /// Key or value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<StorageError> for IdbError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Arc::new(err))
    }
}

impl IdbError {
    /// The DOM exception name of this error.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data { .. } => "DataError",
            Self::Syntax { .. } => "SyntaxError",
            Self::Version { .. } => "VersionError",
            Self::TransactionInactive { .. } => "TransactionInactiveError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::Constraint { .. } => "ConstraintError",
            Self::NotFound { .. } => "NotFoundError",
            Self::ReadOnly { .. } => "ReadOnlyError",
            Self::InvalidAccess { .. } => "InvalidAccessError",
            Self::Abort { .. } => "AbortError",
            Self::DataClone { .. } => "DataCloneError",
            Self::Type { .. } => "TypeError",
            Self::Unknown { .. } | Self::Storage(_) => "UnknownError",
            Self::Codec(err) => match err {
                CodecError::InvalidKeyPath { .. } => "SyntaxError",
                CodecError::DataClone { .. } => "DataCloneError",
                CodecError::Malformed { .. }
                | CodecError::SizeLimitExceeded { .. }
                | CodecError::UnexpectedEof => "UnknownError",
                _ => "DataError",
            },
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates a version error.
    pub fn version(message: impl Into<String>) -> Self {
        Self::Version {
            message: message.into(),
        }
    }

    /// Creates a transaction inactive error.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::TransactionInactive {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly {
            message: message.into(),
        }
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort {
            message: message.into(),
        }
    }

    /// Creates a data clone error.
    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::DataClone {
            message: message.into(),
        }
    }

    /// Creates a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Maps codec failures raised while handling user input to the
    /// exception the caller should see.
    pub(crate) fn from_input(err: CodecError) -> Self {
        match err {
            CodecError::InvalidKeyPath { path } => Self::syntax(format!("invalid key path {path}")),
            CodecError::DataClone { message } => Self::data_clone(message),
            other => Self::data(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_dom_exceptions() {
        assert_eq!(IdbError::data("x").name(), "DataError");
        assert_eq!(IdbError::constraint("x").name(), "ConstraintError");
        assert_eq!(
            IdbError::transaction_inactive("x").name(),
            "TransactionInactiveError"
        );
        assert_eq!(IdbError::type_error("x").name(), "TypeError");
    }

    #[test]
    fn codec_errors_map_to_dom_names() {
        let err: IdbError = CodecError::invalid_key("NaN").into();
        assert_eq!(err.name(), "DataError");
        let err: IdbError = CodecError::invalid_key_path("1a").into();
        assert_eq!(err.name(), "SyntaxError");
        let err = IdbError::from_input(CodecError::data_clone("detached"));
        assert!(matches!(err, IdbError::DataClone { .. }));
    }

    #[test]
    fn storage_errors_are_unknown() {
        let err: IdbError = StorageError::corrupted("bad").into();
        assert_eq!(err.name(), "UnknownError");
        assert!(err.to_string().contains("bad"));
    }
}
