//! Structured value deserializer.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Deserialize a stored value.
///
/// # Errors
///
/// Returns an error if the bytes were not produced by
/// [`crate::serialize_value`] or carry trailing data.
pub fn deserialize_value(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = ValueDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::malformed("trailing bytes after value"));
    }
    Ok(value)
}

/// Maximum allowed element count for arrays and objects.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum nesting of arrays and objects.
const MAX_DEPTH: usize = 512;

/// Streaming deserializer for [`Value`] trees.
pub struct ValueDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> ValueDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    ///
    /// # Errors
    ///
    /// Fails on truncated or structurally invalid input.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            2 => {
                let len = self.read_length(additional_info, MAX_BYTES_LENGTH)?;
                Ok(Value::Binary(self.read_bytes(len)?.to_vec()))
            }
            3 => self.decode_text(additional_info).map(Value::String),
            4 => {
                let len = self.read_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
                self.enter()?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                self.depth -= 1;
                Ok(Value::Array(items))
            }
            5 => {
                let len = self.read_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
                self.enter()?;
                let mut props = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key_byte = self.read_byte()?;
                    if key_byte >> 5 != 3 {
                        return Err(CodecError::malformed("object key is not text"));
                    }
                    let key = self.decode_text(key_byte & 0x1f)?;
                    let item = self.decode()?;
                    props.push((key, item));
                }
                self.depth -= 1;
                Ok(Value::Object(props))
            }
            6 if additional_info == 1 => {
                if self.read_byte()? != 0xfb {
                    return Err(CodecError::malformed("date tag must wrap a double"));
                }
                Ok(Value::Date(self.read_float()?))
            }
            7 => match additional_info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 => Ok(Value::Null),
                23 => Ok(Value::Undefined),
                27 => Ok(Value::Number(self.read_float()?)),
                other => Err(CodecError::malformed(format!(
                    "unsupported simple value {other}"
                ))),
            },
            other => Err(CodecError::malformed(format!(
                "unsupported major type {other}"
            ))),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    fn enter(&mut self) -> CodecResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::malformed("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_float(&mut self) -> CodecResult<f64> {
        let bytes: [u8; 8] = self
            .read_bytes(8)?
            .try_into()
            .map_err(|_| CodecError::UnexpectedEof)?;
        Ok(f64::from_be_bytes(bytes))
    }

    fn read_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => self.read_byte().map(u64::from),
            25 => {
                let bytes = self.read_bytes(2)?;
                Ok(u64::from(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                Ok(u64::from(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                Ok(u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]))
            }
            _ => Err(CodecError::malformed("indefinite or reserved length")),
        }
    }

    fn read_length(&mut self, additional_info: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.read_unsigned(additional_info)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        })
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<String> {
        let len = self.read_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::malformed("invalid UTF-8 in text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::serialize_value;

    #[test]
    fn round_trip_record() {
        let value = Value::object([
            ("id", Value::from(1)),
            ("name", Value::from("Alice")),
            ("joined", Value::Date(1_700_000_000_000.0)),
            ("avatar", Value::Binary(vec![0, 1, 2])),
            ("tags", Value::Array(vec![Value::from("a"), Value::Undefined])),
            ("manager", Value::Null),
            ("active", Value::Bool(true)),
        ]);
        let bytes = serialize_value(&value).unwrap();
        assert_eq!(deserialize_value(&bytes).unwrap(), value);
    }

    #[test]
    fn special_floats_survive() {
        let bytes = serialize_value(&Value::Number(-0.0)).unwrap();
        let Value::Number(n) = deserialize_value(&bytes).unwrap() else {
            panic!("expected number");
        };
        assert!(n == 0.0 && n.is_sign_negative());

        let bytes = serialize_value(&Value::Number(f64::NAN)).unwrap();
        assert!(matches!(deserialize_value(&bytes).unwrap(), Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = serialize_value(&Value::from("hello")).unwrap();
        assert_eq!(
            deserialize_value(&bytes[..3]),
            Err(CodecError::UnexpectedEof)
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert!(deserialize_value(&[0xf6, 0xf6]).is_err());
    }

    #[test]
    fn rejects_non_text_object_keys() {
        // map(1) { 1: null }
        assert!(deserialize_value(&[0xa1, 0x01, 0xf6]).is_err());
    }

    #[test]
    fn rejects_huge_claimed_lengths() {
        let bytes = [0x9b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            deserialize_value(&bytes),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let bytes = vec![0x81; MAX_DEPTH + 1];
        assert!(deserialize_value(&bytes).is_err());
    }
}
