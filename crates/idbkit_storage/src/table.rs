//! In-memory ordered table shared by the backends.

use crate::backend::Entry;
use crate::batch::{BatchOp, ScanDirection, ScanRange, WriteBatch};
use std::collections::BTreeMap;

/// Partitioned ordered map: partition name → key bytes → value bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemTable {
    partitions: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup.
    pub fn get(&self, partition: &str, key: &[u8]) -> Option<&Vec<u8>> {
        self.partitions.get(partition)?.get(key)
    }

    /// Ordered range scan.
    pub fn scan(
        &self,
        partition: &str,
        range: &ScanRange,
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> Vec<Entry> {
        let Some(entries) = self.partitions.get(partition) else {
            return Vec::new();
        };
        if range.is_empty() {
            return Vec::new();
        }
        let limit = limit.unwrap_or(usize::MAX);
        let iter = entries.range::<Vec<u8>, _>(range.as_bounds());
        let clone = |(k, v): (&Vec<u8>, &Vec<u8>)| (k.clone(), v.clone());
        match direction {
            ScanDirection::Forward => iter.take(limit).map(clone).collect(),
            ScanDirection::Reverse => iter.rev().take(limit).map(clone).collect(),
        }
    }

    /// Number of entries inside `range`.
    pub fn count(&self, partition: &str, range: &ScanRange) -> usize {
        match self.partitions.get(partition) {
            Some(entries) if !range.is_empty() => {
                entries.range::<Vec<u8>, _>(range.as_bounds()).count()
            }
            _ => 0,
        }
    }

    /// Applies one operation.
    pub fn apply_op(&mut self, op: &BatchOp) {
        match op {
            BatchOp::Put {
                partition,
                key,
                value,
            } => {
                self.partitions
                    .entry(partition.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
            BatchOp::Delete { partition, key } => {
                if let Some(entries) = self.partitions.get_mut(partition) {
                    entries.remove(key);
                    if entries.is_empty() {
                        self.partitions.remove(partition);
                    }
                }
            }
            BatchOp::Clear { partition } | BatchOp::DropPartition { partition } => {
                self.partitions.remove(partition);
            }
        }
    }

    /// Applies a whole batch.
    pub fn apply(&mut self, batch: &WriteBatch) {
        for op in batch.ops() {
            self.apply_op(op);
        }
    }

    /// Sorted names of non-empty partitions starting with `prefix`.
    pub fn partitions(&self, prefix: &str) -> Vec<String> {
        self.partitions
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Iterates every entry, partition by partition.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8], &[u8])> {
        self.partitions.iter().flat_map(|(name, entries)| {
            entries
                .iter()
                .map(move |(k, v)| (name.as_str(), k.as_slice(), v.as_slice()))
        })
    }

    /// Total number of entries across partitions.
    pub fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}
