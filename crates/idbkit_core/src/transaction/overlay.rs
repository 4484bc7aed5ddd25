//! Buffered writes of a transaction.

use idbkit_storage::{ScanRange, WriteBatch};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Pending state of one partition.
#[derive(Debug, Default, Clone)]
pub(crate) struct PartitionWrites {
    /// Committed entries are hidden; only `entries` remain visible.
    pub(crate) cleared: bool,
    /// The partition is dropped at commit instead of cleared.
    pub(crate) dropped: bool,
    /// Pending puts (`Some`) and deletes (`None`).
    pub(crate) entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl PartitionWrites {
    /// Pending entries inside `range`, in key order.
    pub(crate) fn range(&self, range: &ScanRange) -> Vec<(&Vec<u8>, &Option<Vec<u8>>)> {
        if range.is_empty() {
            return Vec::new();
        }
        self.entries.range::<Vec<u8>, _>(range.as_bounds()).collect()
    }
}

/// The write set of a transaction.
///
/// Nothing reaches the backend until commit, when [`WriteSet::to_batch`]
/// turns the buffered operations into one atomic batch. Aborting simply
/// drops the write set.
#[derive(Debug, Default, Clone)]
pub(crate) struct WriteSet {
    partitions: BTreeMap<String, PartitionWrites>,
}

impl WriteSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Buffered state of `partition`, if it was touched.
    pub(crate) fn partition(&self, partition: &str) -> Option<&PartitionWrites> {
        self.partitions.get(partition)
    }

    fn entry(&mut self, partition: &str) -> &mut PartitionWrites {
        self.partitions.entry(partition.to_string()).or_default()
    }

    pub(crate) fn put(&mut self, partition: &str, key: Vec<u8>, value: Vec<u8>) {
        self.entry(partition).entries.insert(key, Some(value));
    }

    pub(crate) fn delete(&mut self, partition: &str, key: Vec<u8>) {
        let writes = self.entry(partition);
        if writes.cleared {
            // Nothing committed is visible, so forgetting the put is enough.
            writes.entries.remove(&key);
        } else {
            writes.entries.insert(key, None);
        }
    }

    pub(crate) fn clear(&mut self, partition: &str) {
        let writes = self.entry(partition);
        writes.cleared = true;
        writes.entries.clear();
    }

    pub(crate) fn drop_partition(&mut self, partition: &str) {
        let writes = self.entry(partition);
        writes.cleared = true;
        writes.dropped = true;
        writes.entries.clear();
    }

    /// Whether nothing has been written.
    pub(crate) fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Number of buffered operations, counting a clear as one.
    pub(crate) fn len(&self) -> usize {
        self.partitions
            .values()
            .map(|p| p.entries.len() + usize::from(p.cleared))
            .sum()
    }

    /// Converts the buffered writes into one batch.
    ///
    /// Within a partition the clear (or drop) comes first so that puts made
    /// after it survive.
    pub(crate) fn to_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (name, writes) in &self.partitions {
            if writes.dropped {
                batch.drop_partition(name.clone());
            } else if writes.cleared {
                batch.clear(name.clone());
            }
            for (key, value) in &writes.entries {
                match value {
                    Some(value) => batch.put(name.clone(), key.clone(), value.clone()),
                    None => batch.delete(name.clone(), key.clone()),
                }
            }
        }
        batch
    }
}

/// The tighter of two lower bounds.
///
/// On equal bytes an excluded bound is tighter than an included one.
pub(crate) fn max_lower(a: Bound<Vec<u8>>, b: Bound<Vec<u8>>) -> Bound<Vec<u8>> {
    match (&a, &b) {
        (Bound::Unbounded, _) => b,
        (_, Bound::Unbounded) => a,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            if x > y {
                a
            } else if y > x {
                b
            } else if matches!(a, Bound::Excluded(_)) {
                a
            } else {
                b
            }
        }
    }
}

/// The tighter of two upper bounds.
pub(crate) fn min_upper(a: Bound<Vec<u8>>, b: Bound<Vec<u8>>) -> Bound<Vec<u8>> {
    match (&a, &b) {
        (Bound::Unbounded, _) => b,
        (_, Bound::Unbounded) => a,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            if x < y {
                a
            } else if y < x {
                b
            } else if matches!(a, Bound::Excluded(_)) {
                a
            } else {
                b
            }
        }
    }
}
