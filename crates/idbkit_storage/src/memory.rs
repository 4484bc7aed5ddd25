//! In-memory storage backend.

use crate::backend::{Entry, StorageBackend};
use crate::batch::{ScanDirection, ScanRange, WriteBatch};
use crate::error::StorageResult;
use crate::table::MemTable;
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend keeps every partition in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use idbkit_storage::{InMemoryBackend, StorageBackend, WriteBatch};
///
/// let backend = InMemoryBackend::new();
/// let mut batch = WriteBatch::new();
/// batch.put("store", b"k".to_vec(), b"v".to_vec());
/// backend.apply(&batch).unwrap();
/// assert_eq!(backend.get("store", b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    table: RwLock<MemTable>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing contents.
    #[must_use]
    pub fn with_table(table: MemTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn snapshot(&self) -> MemTable {
        self.table.read().clone()
    }

    /// Clears all data from the backend.
    pub fn clear(&self) {
        *self.table.write() = MemTable::new();
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, partition: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.table.read().get(partition, key).cloned())
    }

    fn scan(
        &self,
        partition: &str,
        range: &ScanRange,
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Entry>> {
        Ok(self.table.read().scan(partition, range, direction, limit))
    }

    fn count(&self, partition: &str, range: &ScanRange) -> StorageResult<usize> {
        Ok(self.table.read().count(partition, range))
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        self.table.write().apply(batch);
        Ok(())
    }

    fn partitions(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self.table.read().partitions(prefix))
    }

    fn flush(&self) -> StorageResult<()> {
        // No pending writes
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
