//! IndexedDB keys and key validation.

use crate::encoding::sortable_bits;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Deepest array nesting accepted in a key.
pub const MAX_KEY_DEPTH: usize = 256;

/// A validated IndexedDB key.
///
/// Keys of different kinds order as
/// `Number < Date < String < Binary < Array`. Within a kind, numbers and
/// dates order numerically, strings by UTF-16 code unit, binaries bytewise
/// and arrays element by element with shorter prefixes first.
///
/// The ordering is identical to comparing the encoded forms produced by
/// [`crate::encode_key`]. In particular `-0` orders strictly before `+0`.
#[derive(Debug, Clone)]
pub enum Key {
    /// A number (never NaN).
    Number(f64),
    /// A date in milliseconds since the Unix epoch (never NaN).
    Date(f64),
    /// A string.
    String(String),
    /// A byte sequence.
    Binary(Vec<u8>),
    /// An array of keys.
    Array(Vec<Key>),
}

/// The kind of a key, in cross-kind sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    /// Number key.
    Number,
    /// Date key.
    Date,
    /// String key.
    String,
    /// Binary key.
    Binary,
    /// Array key.
    Array,
}

impl Key {
    /// Create a number key.
    ///
    /// # Errors
    ///
    /// Fails for NaN.
    pub fn number(n: f64) -> CodecResult<Self> {
        if n.is_nan() {
            return Err(CodecError::invalid_key("NaN is not a valid key"));
        }
        Ok(Key::Number(n))
    }

    /// Create a date key from milliseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Fails for an invalid (NaN) time value.
    pub fn date(millis: f64) -> CodecResult<Self> {
        if millis.is_nan() {
            return Err(CodecError::invalid_key("invalid date is not a valid key"));
        }
        Ok(Key::Date(millis))
    }

    /// The kind of this key.
    pub fn kind(&self) -> KeyKind {
        match self {
            Key::Number(_) => KeyKind::Number,
            Key::Date(_) => KeyKind::Date,
            Key::String(_) => KeyKind::String,
            Key::Binary(_) => KeyKind::Binary,
            Key::Array(_) => KeyKind::Array,
        }
    }

    /// Get this key as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this key as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert this key back to a structured value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Number(*n),
            Key::Date(d) => Value::Date(*d),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(b) => Value::Binary(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Encode this key into its order-preserving byte form.
    pub fn encode(&self) -> Vec<u8> {
        crate::encoding::encode_key(self)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                sortable_bits(*a).cmp(&sortable_bits(*b))
            }
            (Key::String(a), Key::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.iter().cmp(b.iter()),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(d) => write!(f, "Date({d})"),
            Key::String(s) => write!(f, "{s:?}"),
            Key::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Binary(b)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

impl TryFrom<f64> for Key {
    type Error = CodecError;

    fn try_from(n: f64) -> CodecResult<Self> {
        Key::number(n)
    }
}

impl TryFrom<&Value> for Key {
    type Error = CodecError;

    fn try_from(value: &Value) -> CodecResult<Self> {
        validate_key(value)
    }
}

/// Convert a structured value into a key.
///
/// Numbers, dates, strings, binaries (including buffer views, which are
/// copied down to their window) and arrays of those are accepted. NaN
/// numbers, invalid dates, detached buffers and any other kind of value are
/// rejected.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] describing the first offending element.
pub fn validate_key(value: &Value) -> CodecResult<Key> {
    let mut walk = KeyWalk::default();
    walk.visit(value)
}

/// Traversal state threaded through array validation.
///
/// Values are owned trees, so an array can never contain itself; the walk
/// bounds nesting instead so hostile input cannot exhaust the stack.
#[derive(Default)]
struct KeyWalk {
    depth: usize,
}

impl KeyWalk {
    fn visit(&mut self, value: &Value) -> CodecResult<Key> {
        match value {
            Value::Number(n) => Key::number(*n),
            Value::Date(d) => Key::date(*d),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Binary(b) => Ok(Key::Binary(b.clone())),
            Value::View(view) => view
                .to_vec()
                .map(Key::Binary)
                .ok_or_else(|| CodecError::invalid_key("buffer is detached")),
            Value::Array(items) => {
                if self.depth >= MAX_KEY_DEPTH {
                    return Err(CodecError::invalid_key(format!(
                        "array key nested deeper than {MAX_KEY_DEPTH}"
                    )));
                }
                self.depth += 1;
                let keys = items
                    .iter()
                    .map(|item| self.visit(item))
                    .collect::<CodecResult<Vec<_>>>();
                self.depth -= 1;
                keys.map(Key::Array)
            }
            Value::Undefined => Err(CodecError::invalid_key("undefined is not a valid key")),
            Value::Null => Err(CodecError::invalid_key("null is not a valid key")),
            Value::Bool(_) => Err(CodecError::invalid_key("booleans are not valid keys")),
            Value::Object(_) => Err(CodecError::invalid_key("objects are not valid keys")),
        }
    }
}
