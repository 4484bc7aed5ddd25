//! Key ranges.

use crate::encoding::{encode_key, prefix_successor};
use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use std::ops::Bound;

/// A contiguous interval of keys.
///
/// Either end may be unbounded; bounded ends are open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// The range matching every key.
    pub fn all() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    /// The range containing exactly `key`.
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Keys above `lower` (or at it, unless `open`).
    pub fn lower_bound(lower: Key, open: bool) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// Keys below `upper` (or at it, unless `open`).
    pub fn upper_bound(upper: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Fails with [`CodecError::InvalidKey`] when `lower > upper`, or when the
    /// two are equal and either end is open.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> CodecResult<Self> {
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            return Err(CodecError::invalid_key(format!(
                "empty range: lower {lower} is not below upper {upper}"
            )));
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// The lower endpoint.
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// The upper endpoint.
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Whether the lower endpoint is excluded.
    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    /// Whether the upper endpoint is excluded.
    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Whether this range contains exactly one key.
    pub fn is_only(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => l == u && !self.lower_open && !self.upper_open,
            _ => false,
        }
    }

    /// Whether `key` falls within the range.
    pub fn includes(&self, key: &Key) -> bool {
        let above = match &self.lower {
            None => true,
            Some(l) if self.lower_open => key > l,
            Some(l) => key >= l,
        };
        let below = match &self.upper {
            None => true,
            Some(u) if self.upper_open => key < u,
            Some(u) => key <= u,
        };
        above && below
    }

    /// Byte bounds over encoded keys, for primary-key partitions.
    pub fn to_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let lower = match &self.lower {
            None => Bound::Unbounded,
            Some(k) if self.lower_open => Bound::Excluded(encode_key(k)),
            Some(k) => Bound::Included(encode_key(k)),
        };
        let upper = match &self.upper {
            None => Bound::Unbounded,
            Some(k) if self.upper_open => Bound::Excluded(encode_key(k)),
            Some(k) => Bound::Included(encode_key(k)),
        };
        (lower, upper)
    }

    /// Byte bounds over composite `index key ‖ primary key` entries.
    ///
    /// Every composite entry for an index key starts with that key's
    /// encoding, so inclusive ends extend to the prefix successor.
    pub fn to_index_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let lower = match &self.lower {
            None => Bound::Unbounded,
            Some(k) if self.lower_open => successor_bound(&encode_key(k), Bound::Included),
            Some(k) => Bound::Included(encode_key(k)),
        };
        let upper = match &self.upper {
            None => Bound::Unbounded,
            Some(k) if self.upper_open => Bound::Excluded(encode_key(k)),
            Some(k) => successor_bound(&encode_key(k), Bound::Excluded),
        };
        (lower, upper)
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        Self::only(key)
    }
}

fn successor_bound(prefix: &[u8], wrap: fn(Vec<u8>) -> Bound<Vec<u8>>) -> Bound<Vec<u8>> {
    // Encoded keys never consist solely of 0xFF, so a successor exists.
    prefix_successor(prefix).map_or(Bound::Unbounded, wrap)
}
