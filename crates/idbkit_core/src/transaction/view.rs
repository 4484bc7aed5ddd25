//! Reads that see a transaction's own writes.

use crate::error::IdbResult;
use crate::transaction::overlay::WriteSet;
use idbkit_storage::{Entry, ScanDirection, ScanRange, StorageBackend};
use std::collections::BTreeMap;

/// The committed backend state with a write set layered on top.
pub(crate) struct TxnView<'a> {
    backend: &'a dyn StorageBackend,
    writes: &'a WriteSet,
}

impl<'a> TxnView<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend, writes: &'a WriteSet) -> Self {
        Self { backend, writes }
    }

    pub(crate) fn get(&self, partition: &str, key: &[u8]) -> IdbResult<Option<Vec<u8>>> {
        if let Some(writes) = self.writes.partition(partition) {
            if let Some(pending) = writes.entries.get(key) {
                return Ok(pending.clone());
            }
            if writes.cleared {
                return Ok(None);
            }
        }
        Ok(self.backend.get(partition, key)?)
    }

    /// Ordered scan over the merged state.
    ///
    /// The backend is asked for `limit` plus the number of pending entries
    /// in range: pending deletes can hide at most that many committed
    /// entries, so the first `limit` merged entries are always exact.
    pub(crate) fn scan(
        &self,
        partition: &str,
        range: &ScanRange,
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> IdbResult<Vec<Entry>> {
        let Some(writes) = self.writes.partition(partition) else {
            return Ok(self.backend.scan(partition, range, direction, limit)?);
        };
        let pending = writes.range(range);

        let base = if writes.cleared {
            Vec::new()
        } else {
            let widened = limit.map(|l| l.saturating_add(pending.len()));
            self.backend.scan(partition, range, direction, widened)?
        };
        let base_len = base.len();
        let exhausted = limit.map_or(true, |l| base_len < l.saturating_add(pending.len()));
        let edge = base.last().map(|(k, _)| k.clone());

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base.into_iter().collect();
        for (key, value) in pending {
            // Past the last fetched committed key the merge is incomplete.
            if !exhausted {
                if let Some(edge) = &edge {
                    let beyond = match direction {
                        ScanDirection::Forward => key > edge,
                        ScanDirection::Reverse => key < edge,
                    };
                    if beyond {
                        continue;
                    }
                }
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let take = limit.unwrap_or(usize::MAX);
        let entries = match direction {
            ScanDirection::Forward => merged.into_iter().take(take).collect(),
            ScanDirection::Reverse => merged.into_iter().rev().take(take).collect(),
        };
        Ok(entries)
    }

    /// Number of merged entries inside `range`.
    pub(crate) fn count(&self, partition: &str, range: &ScanRange) -> IdbResult<usize> {
        let Some(writes) = self.writes.partition(partition) else {
            return Ok(self.backend.count(partition, range)?);
        };
        if writes.cleared {
            return Ok(writes
                .range(range)
                .into_iter()
                .filter(|(_, value)| value.is_some())
                .count());
        }

        let mut count = self.backend.count(partition, range)?;
        for (key, value) in writes.range(range) {
            let committed = self.backend.get(partition, key)?.is_some();
            match (committed, value.is_some()) {
                (false, true) => count += 1,
                (true, false) => count = count.saturating_sub(1),
                _ => {}
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbkit_storage::{InMemoryBackend, WriteBatch};
    use std::ops::Bound;

    fn backend_with(keys: &[u8]) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        for k in keys {
            batch.put("p", vec![*k], vec![*k]);
        }
        backend.apply(&batch).unwrap();
        backend
    }

    fn keys(entries: &[Entry]) -> Vec<u8> {
        entries.iter().map(|(k, _)| k[0]).collect()
    }

    #[test]
    fn pending_writes_shadow_committed_state() {
        let backend = backend_with(&[1, 2, 3]);
        let mut writes = WriteSet::new();
        writes.delete("p", vec![2]);
        writes.put("p", vec![4], vec![40]);
        writes.put("p", vec![1], vec![10]);
        let view = TxnView::new(&backend, &writes);

        assert_eq!(view.get("p", &[1]).unwrap(), Some(vec![10]));
        assert_eq!(view.get("p", &[2]).unwrap(), None);
        assert_eq!(view.get("p", &[3]).unwrap(), Some(vec![3]));

        let all = view
            .scan("p", &ScanRange::all(), ScanDirection::Forward, None)
            .unwrap();
        assert_eq!(keys(&all), vec![1, 3, 4]);
        assert_eq!(view.count("p", &ScanRange::all()).unwrap(), 3);
    }

    #[test]
    fn limited_scan_is_exact() {
        let backend = backend_with(&[1, 2, 3, 4, 5, 6]);
        let mut writes = WriteSet::new();
        writes.delete("p", vec![1]);
        writes.delete("p", vec![2]);
        writes.put("p", vec![9], vec![9]);
        let view = TxnView::new(&backend, &writes);

        let first = view
            .scan("p", &ScanRange::all(), ScanDirection::Forward, Some(2))
            .unwrap();
        assert_eq!(keys(&first), vec![3, 4]);

        let last = view
            .scan("p", &ScanRange::all(), ScanDirection::Reverse, Some(2))
            .unwrap();
        assert_eq!(keys(&last), vec![9, 6]);
    }

    #[test]
    fn cleared_partition_hides_committed_entries() {
        let backend = backend_with(&[1, 2]);
        let mut writes = WriteSet::new();
        writes.clear("p");
        writes.put("p", vec![7], vec![7]);
        let view = TxnView::new(&backend, &writes);

        assert_eq!(view.get("p", &[1]).unwrap(), None);
        let range = ScanRange::new(Bound::Included(vec![0]), Bound::Unbounded);
        assert_eq!(
            keys(&view.scan("p", &range, ScanDirection::Forward, None).unwrap()),
            vec![7]
        );
        assert_eq!(view.count("p", &range).unwrap(), 1);
    }

    #[test]
    fn untouched_partitions_read_through() {
        let backend = backend_with(&[5]);
        let writes = WriteSet::new();
        let view = TxnView::new(&backend, &writes);
        assert_eq!(view.get("p", &[5]).unwrap(), Some(vec![5]));
        assert_eq!(view.count("p", &ScanRange::all()).unwrap(), 1);
    }
}
