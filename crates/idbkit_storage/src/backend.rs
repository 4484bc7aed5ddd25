//! Storage backend trait definition.

use crate::batch::{ScanDirection, ScanRange, WriteBatch};
use crate::error::StorageResult;

/// Key/value pair returned by scans.
pub type Entry = (Vec<u8>, Vec<u8>);

/// An ordered, partitioned byte store.
///
/// Backends know nothing about keys, values or schemas. A partition is an
/// independent namespace whose entries are ordered by their raw key bytes.
///
/// # Invariants
///
/// - `apply` is atomic: after it returns, either every op in the batch is
///   visible or none is
/// - `scan` returns entries in key order (or reverse key order)
/// - a missing partition behaves as an empty one
/// - backends must be `Send + Sync`; they serialize `apply` internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and ephemeral databases
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn get(&self, partition: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Reads up to `limit` entries of `partition` inside `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn scan(
        &self,
        partition: &str,
        range: &ScanRange,
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Entry>>;

    /// Counts the entries of `partition` inside `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn count(&self, partition: &str, range: &ScanRange) -> StorageResult<usize> {
        Ok(self
            .scan(partition, range, ScanDirection::Forward, None)?
            .len())
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable; in that case
    /// none of its operations is visible.
    fn apply(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Lists the non-empty partitions whose name starts with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn partitions(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Makes all applied batches durable.
    ///
    /// This is a stronger guarantee than `flush`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}
