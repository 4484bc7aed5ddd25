//! Structured value serializer.
//!
//! Records are stored in a CBOR subset:
//!
//! - `undefined`, `null` and booleans are simple values
//! - numbers are always 64-bit floats (`0xfb`)
//! - dates are tag 1 around a 64-bit float
//! - binaries are byte strings, strings are text strings
//! - objects are maps with text keys, kept in insertion order

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Serialize a value for storage.
///
/// # Errors
///
/// Returns an error if the value contains a view over a detached buffer.
pub fn serialize_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = ValueEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Streaming serializer for [`Value`] trees.
pub struct ValueEncoder {
    buffer: Vec<u8>,
}

impl ValueEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Fails on views over detached buffers.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Undefined => self.buffer.push(0xf7),
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Number(n) => self.encode_float(*n),
            Value::Date(d) => {
                // tag 1: epoch-based date/time
                self.buffer.push(0xc1);
                self.encode_float(*d);
            }
            Value::String(s) => self.encode_text(s),
            Value::Binary(b) => self.encode_bytes(b),
            Value::View(view) => {
                let bytes = view
                    .to_vec()
                    .ok_or_else(|| CodecError::data_clone("buffer is detached"))?;
                self.encode_bytes(&bytes);
            }
            Value::Array(items) => {
                self.encode_unsigned(4, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Object(props) => {
                self.encode_unsigned(5, props.len() as u64);
                for (key, item) in props {
                    self.encode_text(key);
                    self.encode(item)?;
                }
            }
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn encode_float(&mut self, n: f64) {
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&n.to_be_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SharedBuffer;

    #[test]
    fn encode_simple_values() {
        assert_eq!(serialize_value(&Value::Undefined).unwrap(), vec![0xf7]);
        assert_eq!(serialize_value(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(serialize_value(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(serialize_value(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn numbers_are_doubles() {
        assert_eq!(
            serialize_value(&Value::from(1)).unwrap(),
            vec![0xfb, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn dates_are_tagged() {
        let bytes = serialize_value(&Value::Date(0.0)).unwrap();
        assert_eq!(bytes[0], 0xc1);
        assert_eq!(bytes[1], 0xfb);
    }

    #[test]
    fn object_keeps_insertion_order() {
        let value = Value::object([("z", Value::Null), ("a", Value::Null)]);
        let bytes = serialize_value(&value).unwrap();
        assert_eq!(bytes, vec![0xa2, 0x61, b'z', 0xf6, 0x61, b'a', 0xf6]);
    }

    #[test]
    fn long_text_uses_length_prefix() {
        let text = "x".repeat(300);
        let bytes = serialize_value(&Value::from(text.as_str())).unwrap();
        assert_eq!(&bytes[..3], &[0x79, 0x01, 0x2c]);
        assert_eq!(bytes.len(), 303);
    }

    #[test]
    fn detached_view_fails() {
        let buffer = SharedBuffer::new(vec![1, 2]);
        let value = Value::View(buffer.full_view());
        buffer.detach();
        assert!(matches!(
            serialize_value(&value),
            Err(CodecError::DataClone { .. })
        ));
    }
}
