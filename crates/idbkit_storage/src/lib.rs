//! # idbkit storage
//!
//! Ordered, partitioned byte stores for idbkit.
//!
//! The engine keeps each object store and each index in its own
//! **partition**: an independent map from key bytes to value bytes, scanned
//! in lexicographic key order. Backends never interpret keys or values.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - Append-only, checksummed commit log replayed on open
//!
//! ## Example
//!
//! ```rust
//! use idbkit_storage::{InMemoryBackend, ScanDirection, ScanRange, StorageBackend, WriteBatch};
//!
//! let backend = InMemoryBackend::new();
//! let mut batch = WriteBatch::new();
//! batch.put("letters", b"b".to_vec(), b"2".to_vec());
//! batch.put("letters", b"a".to_vec(), b"1".to_vec());
//! backend.apply(&batch).unwrap();
//!
//! let entries = backend
//!     .scan("letters", &ScanRange::all(), ScanDirection::Forward, None)
//!     .unwrap();
//! assert_eq!(entries[0].0, b"a".to_vec());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod file;
mod log;
mod memory;
mod table;

pub use backend::{Entry, StorageBackend};
pub use batch::{BatchOp, ScanDirection, ScanRange, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileBackendOptions, RecoveryStats};
pub use log::{compute_crc32, LOG_MAGIC, LOG_VERSION};
pub use memory::InMemoryBackend;
pub use table::MemTable;
