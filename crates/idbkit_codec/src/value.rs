//! Structured value tree.

use crate::error::{CodecError, CodecResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A structured value as stored in an object store.
///
/// Values form an owned tree: objects carry only their own string-keyed
/// properties, in insertion order. Anything handed to the engine is first
/// passed through [`Value::structured_clone`], which produces the canonical
/// form that gets persisted and that key paths are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The `undefined` value.
    Undefined,
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// IEEE-754 double.
    Number(f64),
    /// Text string.
    String(String),
    /// Date as milliseconds since the Unix epoch (NaN for an invalid date).
    Date(f64),
    /// Owned byte buffer.
    Binary(Vec<u8>),
    /// A window over a shared, detachable buffer.
    View(BufferView),
    /// Array of values.
    Array(Vec<Value>),
    /// Object with own properties in insertion order.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Create an object value from property pairs.
    ///
    /// Later duplicates of a property name replace earlier ones, keeping the
    /// position of the first occurrence.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut value = Value::Object(Vec::new());
        for (key, item) in pairs {
            value.insert(key, item);
        }
        value
    }

    /// Produce the storable clone of this value.
    ///
    /// Buffer views collapse into plain binary covering only their window.
    ///
    /// # Errors
    ///
    /// Fails if the value contains a view over a detached buffer.
    pub fn structured_clone(&self) -> CodecResult<Value> {
        Ok(match self {
            Value::View(view) => Value::Binary(
                view.to_vec()
                    .ok_or_else(|| CodecError::data_clone("buffer is detached"))?,
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::structured_clone)
                    .collect::<CodecResult<_>>()?,
            ),
            Value::Object(props) => Value::Object(
                props
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.structured_clone()?)))
                    .collect::<CodecResult<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Check if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is an object.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get the own properties of an object value.
    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(props) => Some(props),
            _ => None,
        }
    }

    /// Look up an own property of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(props) => props.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable lookup of an own property of an object value.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object(props) => props
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Set a property on an object value.
    ///
    /// Returns the previous value of the property. Does nothing on
    /// non-object values.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let Value::Object(props) = self else {
            return None;
        };
        let key = key.into();
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                props.push((key, value));
                None
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Binary(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BufferView> for Value {
    fn from(view: BufferView) -> Self {
        Value::View(view)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

/// A byte buffer that can be shared by several views and detached.
///
/// Detaching empties the buffer for every view that refers to it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<RwLock<Option<Vec<u8>>>>,
}

impl SharedBuffer {
    /// Wrap bytes in a new shared buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(Some(bytes))),
        }
    }

    /// Detach the buffer, invalidating every view over it.
    pub fn detach(&self) {
        self.bytes.write().take();
    }

    /// Whether the buffer has been detached.
    pub fn is_detached(&self) -> bool {
        self.bytes.read().is_none()
    }

    /// Byte length of the buffer (0 once detached).
    pub fn len(&self) -> usize {
        self.bytes.read().as_ref().map_or(0, Vec::len)
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a view over `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the window falls outside the buffer.
    pub fn view(&self, offset: usize, len: usize) -> CodecResult<BufferView> {
        if offset.checked_add(len).map_or(true, |end| end > self.len()) {
            return Err(CodecError::data_clone(format!(
                "view {offset}+{len} exceeds buffer of {} bytes",
                self.len()
            )));
        }
        Ok(BufferView {
            buffer: self.clone(),
            offset,
            len,
        })
    }

    /// A view spanning the whole buffer.
    pub fn full_view(&self) -> BufferView {
        BufferView {
            buffer: self.clone(),
            offset: 0,
            len: self.len(),
        }
    }
}

/// A typed-array style window into a [`SharedBuffer`].
#[derive(Debug, Clone)]
pub struct BufferView {
    buffer: SharedBuffer,
    offset: usize,
    len: usize,
}

impl BufferView {
    /// The underlying buffer.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Offset of the window within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the window.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the bytes of the window, or `None` if the buffer is detached.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        let guard = self.buffer.bytes.read();
        let bytes = guard.as_ref()?;
        bytes.get(self.offset..self.offset + self.len).map(<[u8]>::to_vec)
    }
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}
