//! File-based storage backend for persistent storage.

use crate::backend::{Entry, StorageBackend};
use crate::batch::{ScanDirection, ScanRange, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::log::{encode_record, read_record, ReadOutcome, RecordType};
use crate::table::MemTable;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Options for [`FileBackend::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBackendOptions {
    /// Create the log (and its parent directories) if it does not exist.
    pub create_if_missing: bool,
    /// `fsync` after every applied batch.
    pub sync_on_write: bool,
    /// Rewrite the log as a single snapshot right after replay.
    pub compact_on_open: bool,
}

impl Default for FileBackendOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: false,
            compact_on_open: false,
        }
    }
}

impl FileBackendOptions {
    /// Sets whether to create a missing log.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether every batch is synced to disk.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether to compact right after opening.
    #[must_use]
    pub const fn compact_on_open(mut self, value: bool) -> Self {
        self.compact_on_open = value;
        self
    }
}

/// Summary of a replayed log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records replayed.
    pub records: usize,
    /// Bytes cut off the end of a torn log.
    pub truncated_bytes: u64,
}

#[derive(Debug)]
struct LogFile {
    file: File,
    size: u64,
}

/// A durable backend built on an append-only commit log.
///
/// Every applied batch becomes one checksummed record at the end of the
/// log. On open the log is replayed into an in-memory table that serves all
/// reads. A record torn by a crash is cut off; any other damage is reported
/// as corruption.
///
/// A sibling `<file>.lock` is held with an exclusive advisory lock for the
/// lifetime of the backend.
///
/// # Example
///
/// ```no_run
/// use idbkit_storage::{FileBackend, FileBackendOptions, StorageBackend, WriteBatch};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("data.idb"), FileBackendOptions::default()).unwrap();
/// let mut batch = WriteBatch::new();
/// batch.put("store", b"k".to_vec(), b"v".to_vec());
/// backend.apply(&batch).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    log: Mutex<LogFile>,
    table: RwLock<MemTable>,
    options: FileBackendOptions,
    recovery: RecoveryStats,
    _lock_file: File,
}

impl FileBackend {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the log is missing and `create_if_missing` is false
    /// - another process holds the lock ([`StorageError::Locked`])
    /// - the log is corrupted
    /// - I/O errors occur
    pub fn open(path: &Path, options: FileBackendOptions) -> StorageResult<Self> {
        if !path.exists() {
            if !options.create_if_missing {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("log does not exist: {}", path.display()),
                )));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = lock_path(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(lock_path.display().to_string()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (table, valid_len, mut recovery) = replay(&data)?;
        if valid_len < data.len() {
            let cut = (data.len() - valid_len) as u64;
            tracing::warn!(
                path = %path.display(),
                offset = valid_len,
                bytes = cut,
                "truncating torn record at end of log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
            recovery.truncated_bytes = cut;
        }
        tracing::debug!(
            path = %path.display(),
            records = recovery.records,
            entries = table.len(),
            "log replayed"
        );

        let backend = Self {
            path: path.to_path_buf(),
            log: Mutex::new(LogFile {
                file,
                size: valid_len as u64,
            }),
            table: RwLock::new(table),
            options,
            recovery,
            _lock_file: lock_file,
        };
        if options.compact_on_open {
            backend.compact()?;
        }
        Ok(backend)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.log.lock().size
    }

    /// What replay found when the backend was opened.
    #[must_use]
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> MemTable {
        self.table.read().clone()
    }

    /// Rewrites the log as a single snapshot record.
    ///
    /// The snapshot is written to a temporary sibling, synced and renamed
    /// over the log, so a crash leaves either the old or the new log.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<()> {
        let mut log = self.log.lock();
        let snapshot: WriteBatch = {
            let table = self.table.read();
            let mut batch = WriteBatch::new();
            for (partition, key, value) in table.iter() {
                batch.put(partition, key.to_vec(), value.to_vec());
            }
            batch
        };
        let record = encode_record(RecordType::Snapshot, &snapshot)?;

        let temp_path = temp_path(&self.path);
        {
            let mut temp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            temp.write_all(&record)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        let previous = log.size;
        log.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        log.size = record.len() as u64;
        tracing::info!(
            path = %self.path.display(),
            before = previous,
            after = log.size,
            entries = snapshot.len(),
            "log compacted"
        );
        Ok(())
    }

    fn append(&self, log: &mut LogFile, record: &[u8]) -> StorageResult<()> {
        let previous = log.size;
        let written = log
            .file
            .seek(SeekFrom::Start(previous))
            .and_then(|_| log.file.write_all(record))
            .and_then(|()| log.file.flush());
        if let Err(err) = written {
            // Drop any partial record so replay never sees it.
            if let Err(truncate) = log.file.set_len(previous) {
                tracing::warn!(
                    offset = previous,
                    error = %truncate,
                    "could not drop partial record after failed append"
                );
            }
            return Err(err.into());
        }
        if self.options.sync_on_write {
            log.file.sync_data()?;
        }
        log.size = previous + record.len() as u64;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
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
        if batch.is_empty() {
            return Ok(());
        }
        let record = encode_record(RecordType::Batch, batch)?;
        let mut log = self.log.lock();
        self.append(&mut log, &record)?;
        self.table.write().apply(batch);
        tracing::trace!(ops = batch.len(), bytes = record.len(), "batch appended");
        Ok(())
    }

    fn partitions(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self.table.read().partitions(prefix))
    }

    fn flush(&self) -> StorageResult<()> {
        self.log.lock().file.flush()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.log.lock().file.sync_all()?;
        Ok(())
    }
}

fn replay(data: &[u8]) -> StorageResult<(MemTable, usize, RecoveryStats)> {
    let mut table = MemTable::new();
    let mut stats = RecoveryStats::default();
    let mut offset = 0;
    loop {
        match read_record(data, offset)? {
            ReadOutcome::Record(record, len) => {
                if record.record_type == RecordType::Snapshot {
                    table = MemTable::new();
                }
                table.apply(&record.batch);
                stats.records += 1;
                offset += len;
            }
            ReadOutcome::Truncated | ReadOutcome::End => break,
        }
    }
    Ok((table, offset, stats))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn lock_path(path: &Path) -> PathBuf {
    sibling(path, ".lock")
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".compact")
}
