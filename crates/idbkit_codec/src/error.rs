//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while validating, encoding or decoding keys and values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value is not a valid key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the value was rejected.
        message: String,
    },

    /// The key path string or array is syntactically invalid.
    #[error("invalid key path: {path}")]
    InvalidKeyPath {
        /// The offending key path.
        path: String,
    },

    /// Evaluating a key path against a value failed.
    #[error("key path `{path}` could not be evaluated: {message}")]
    KeyPathEvaluation {
        /// The key path being evaluated.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// A generated key could not be written back into a value.
    #[error("cannot inject key at `{path}`: {message}")]
    KeyInjection {
        /// The key path used for injection.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// The value cannot be cloned for storage.
    #[error("value cannot be cloned: {message}")]
    DataClone {
        /// Description of the failure.
        message: String,
    },

    /// Bytes handed to a decoder were not produced by the matching encoder.
    #[error("malformed input: {message}")]
    Malformed {
        /// Description of the structural error.
        message: String,
    },

    /// A length or element count exceeds the decoder's limits.
    #[error("size limit exceeded: claimed {claimed}, max allowed {max_allowed}")]
    SizeLimitExceeded {
        /// The length claimed by the input.
        claimed: u64,
        /// The maximum the decoder accepts.
        max_allowed: u64,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl CodecError {
    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an invalid key path error.
    pub fn invalid_key_path(path: impl Into<String>) -> Self {
        Self::InvalidKeyPath { path: path.into() }
    }

    /// Create a key path evaluation error.
    pub fn key_path_evaluation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyPathEvaluation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a key injection error.
    pub fn key_injection(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyInjection {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a data clone error.
    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::DataClone {
            message: message.into(),
        }
    }

    /// Create a malformed input error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
