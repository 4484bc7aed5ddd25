//! Write batches and scan ranges.

use std::ops::Bound;

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace `key` in `partition`.
    Put {
        /// Target partition.
        partition: String,
        /// Entry key.
        key: Vec<u8>,
        /// Entry value.
        value: Vec<u8>,
    },
    /// Remove `key` from `partition`, if present.
    Delete {
        /// Target partition.
        partition: String,
        /// Entry key.
        key: Vec<u8>,
    },
    /// Remove every entry of a partition, keeping the partition.
    Clear {
        /// Target partition.
        partition: String,
    },
    /// Remove a partition with all of its entries.
    DropPartition {
        /// Target partition.
        partition: String,
    },
}

impl BatchOp {
    /// The partition this operation touches.
    pub fn partition(&self) -> &str {
        match self {
            BatchOp::Put { partition, .. }
            | BatchOp::Delete { partition, .. }
            | BatchOp::Clear { partition }
            | BatchOp::DropPartition { partition } => partition,
        }
    }
}

/// An ordered list of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, partition: impl Into<String>, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            partition: partition.into(),
            key,
            value,
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, partition: impl Into<String>, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete {
            partition: partition.into(),
            key,
        });
    }

    /// Queue a clear.
    pub fn clear(&mut self, partition: impl Into<String>) {
        self.ops.push(BatchOp::Clear {
            partition: partition.into(),
        });
    }

    /// Queue a partition drop.
    pub fn drop_partition(&mut self, partition: impl Into<String>) {
        self.ops.push(BatchOp::DropPartition {
            partition: partition.into(),
        });
    }

    /// Append a prepared operation.
    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    /// The queued operations, in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Scan order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanDirection {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// A byte-key interval for scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    /// Lower end.
    pub lower: Bound<Vec<u8>>,
    /// Upper end.
    pub upper: Bound<Vec<u8>>,
}

impl ScanRange {
    /// The range covering a whole partition.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range from explicit bounds.
    #[must_use]
    pub fn new(lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        Self { lower, upper }
    }

    /// Borrowed bounds, usable with `BTreeMap::range`.
    pub fn as_bounds(&self) -> (Bound<&Vec<u8>>, Bound<&Vec<u8>>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }

    /// Whether `key` falls within the range.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => key >= l.as_slice(),
            Bound::Excluded(l) => key > l.as_slice(),
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => key <= u.as_slice(),
            Bound::Excluded(u) => key < u.as_slice(),
        };
        above && below
    }

    /// Whether the range can contain no key at all.
    ///
    /// `BTreeMap::range` panics on inverted bounds, so callers check first.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l) | Bound::Excluded(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
            _ => false,
        }
    }
}

impl Default for ScanRange {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_collects_ops_in_order() {
        let mut batch = WriteBatch::new();
        batch.put("a", vec![1], vec![2]);
        batch.delete("a", vec![1]);
        batch.clear("b");
        batch.drop_partition("c");

        assert_eq!(batch.len(), 4);
        let partitions: Vec<_> = batch.ops().iter().map(BatchOp::partition).collect();
        assert_eq!(partitions, vec!["a", "a", "b", "c"]);
    }

    #[test]
    fn range_contains() {
        let range = ScanRange::new(Bound::Excluded(vec![1]), Bound::Included(vec![3]));
        assert!(!range.contains_key(&[1]));
        assert!(range.contains_key(&[1, 0]));
        assert!(range.contains_key(&[3]));
        assert!(!range.contains_key(&[3, 0]));
        assert!(ScanRange::all().contains_key(&[]));
    }

    #[test]
    fn empty_ranges() {
        assert!(ScanRange::new(Bound::Included(vec![2]), Bound::Included(vec![1])).is_empty());
        assert!(ScanRange::new(Bound::Excluded(vec![1]), Bound::Included(vec![1])).is_empty());
        assert!(ScanRange::new(Bound::Included(vec![1]), Bound::Excluded(vec![1])).is_empty());
        assert!(!ScanRange::new(Bound::Included(vec![1]), Bound::Included(vec![1])).is_empty());
        assert!(!ScanRange::all().is_empty());
    }
}
