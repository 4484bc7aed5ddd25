//! Order-preserving binary key encoding.
//!
//! Every encoded key starts with a one-byte type tag followed by a
//! type-specific payload:
//!
//! ```text
//! Number  0x10 | 8-byte sortable float
//! Date    0x20 | 8-byte sortable float (ms since epoch)
//! String  0x30 | byte-stuffed UTF-16BE code units | 00 00
//! Binary  0x40 | byte-stuffed bytes                | 00 00
//! Array   0x50 | encoded element*                  | 00
//! ```
//!
//! Byte stuffing writes `0x00` as `00 01`, so the `00 00` terminator can
//! never appear inside the payload. Because every element starts with a
//! non-zero tag, a single `00` unambiguously ends an array.
//!
//! Strings are stuffed per byte of their UTF-16BE form, not per code unit.
//! Escaping whole code units would have to map U+0000 onto some other unit
//! and it would then collide with U+0001.
//!
//! The encoding is prefix-free, and comparing two encodings bytewise yields
//! exactly the key ordering. Composite entries (index key followed by primary
//! key) therefore sort by the pair.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;

/// Type tag for number keys.
pub const TAG_NUMBER: u8 = 0x10;
/// Type tag for date keys.
pub const TAG_DATE: u8 = 0x20;
/// Type tag for string keys.
pub const TAG_STRING: u8 = 0x30;
/// Type tag for binary keys.
pub const TAG_BINARY: u8 = 0x40;
/// Type tag for array keys.
pub const TAG_ARRAY: u8 = 0x50;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

/// Encode a key into its order-preserving byte form.
pub fn encode_key(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    write_key(key, &mut out);
    out
}

/// Append the encoding of `key` to `out`.
pub fn write_key(key: &Key, out: &mut Vec<u8>) {
    match key {
        Key::Number(n) => {
            out.push(TAG_NUMBER);
            write_float(*n, out);
        }
        Key::Date(d) => {
            out.push(TAG_DATE);
            write_float(*d, out);
        }
        Key::String(s) => {
            out.push(TAG_STRING);
            write_stuffed(s.encode_utf16().flat_map(u16::to_be_bytes), out);
        }
        Key::Binary(b) => {
            out.push(TAG_BINARY);
            write_stuffed(b.iter().copied(), out);
        }
        Key::Array(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                write_key(item, out);
            }
            out.push(TERMINATOR);
        }
    }
}

/// Map a float to a `u64` whose unsigned order matches the float order.
///
/// Non-negative values (including `+0`) get their sign bit set, negative
/// values (including `-0`) have every bit inverted.
pub fn sortable_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if value.is_sign_negative() {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

fn write_float(value: f64, out: &mut Vec<u8>) {
    out.extend_from_slice(&sortable_bits(value).to_be_bytes());
}

fn write_stuffed(bytes: impl Iterator<Item = u8>, out: &mut Vec<u8>) {
    for byte in bytes {
        if byte == TERMINATOR {
            out.push(TERMINATOR);
            out.push(ESCAPE);
        } else {
            out.push(byte);
        }
    }
    out.push(TERMINATOR);
    out.push(TERMINATOR);
}

/// Decode a complete encoded key.
///
/// # Errors
///
/// Fails if the bytes are not exactly one key produced by [`encode_key`].
pub fn decode_key(bytes: &[u8]) -> CodecResult<Key> {
    let (key, used) = decode_key_prefix(bytes)?;
    if used != bytes.len() {
        return Err(CodecError::malformed(format!(
            "{} trailing bytes after key",
            bytes.len() - used
        )));
    }
    Ok(key)
}

/// Decode the key at the start of `bytes`, returning it with the number of
/// bytes consumed.
///
/// # Errors
///
/// Fails if the bytes do not start with a key produced by [`encode_key`].
pub fn decode_key_prefix(bytes: &[u8]) -> CodecResult<(Key, usize)> {
    let mut reader = KeyReader { data: bytes, pos: 0 };
    let key = reader.read_key()?;
    Ok((key, reader.pos))
}

/// Compare two encoded keys: `-1`, `0` or `1`.
///
/// Plain lexicographic byte order; a strict prefix sorts first.
pub fn compare_keys(a: &[u8], b: &[u8]) -> i8 {
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// The smallest byte string greater than every string starting with `prefix`.
///
/// Returns `None` when no such string exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != u8::MAX {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl KeyReader<'_> {
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek_byte(&self) -> CodecResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof)
    }

    fn read_key(&mut self) -> CodecResult<Key> {
        match self.read_byte()? {
            TAG_NUMBER => Ok(Key::Number(self.read_float()?)),
            TAG_DATE => Ok(Key::Date(self.read_float()?)),
            TAG_STRING => {
                let bytes = self.read_stuffed()?;
                if bytes.len() % 2 != 0 {
                    return Err(CodecError::malformed("odd-length UTF-16 payload"));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map(Key::String)
                    .map_err(|_| CodecError::malformed("invalid UTF-16 payload"))
            }
            TAG_BINARY => Ok(Key::Binary(self.read_stuffed()?)),
            TAG_ARRAY => {
                let mut items = Vec::new();
                while self.peek_byte()? != TERMINATOR {
                    items.push(self.read_key()?);
                }
                self.pos += 1;
                Ok(Key::Array(items))
            }
            tag => Err(CodecError::malformed(format!("unknown key tag 0x{tag:02x}"))),
        }
    }

    fn read_float(&mut self) -> CodecResult<f64> {
        let end = self.pos + 8;
        let bytes: [u8; 8] = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?
            .try_into()
            .map_err(|_| CodecError::UnexpectedEof)?;
        self.pos = end;
        let sortable = u64::from_be_bytes(bytes);
        let bits = if sortable & (1 << 63) != 0 {
            sortable ^ (1 << 63)
        } else {
            !sortable
        };
        let value = f64::from_bits(bits);
        if value.is_nan() {
            return Err(CodecError::malformed("NaN in encoded key"));
        }
        Ok(value)
    }

    fn read_stuffed(&mut self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte != TERMINATOR {
                out.push(byte);
                continue;
            }
            match self.read_byte()? {
                TERMINATOR => return Ok(out),
                ESCAPE => out.push(0),
                other => {
                    return Err(CodecError::malformed(format!(
                        "invalid escape 00 {other:02x}"
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(key: impl Into<Key>) -> Vec<u8> {
        encode_key(&key.into())
    }

    #[test]
    fn number_layout() {
        let bytes = enc(1);
        assert_eq!(bytes[0], TAG_NUMBER);
        // 1.0 = 0x3FF0..., sign bit flipped on the first byte
        assert_eq!(&bytes[1..], &[0xBF, 0xF0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn negative_numbers_invert_every_byte() {
        let bytes = enc(-1);
        // -1.0 = 0xBFF0..., inverted
        assert_eq!(&bytes[1..], &[0x40, 0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn negative_number_ordering() {
        let values = [-5, -1, 0, 1];
        for pair in values.windows(2) {
            assert_eq!(compare_keys(&enc(pair[0]), &enc(pair[1])), -1);
        }
        assert_eq!(compare_keys(&enc(-1), &enc(1)), -1);
    }

    #[test]
    fn negative_zero_takes_negative_path() {
        let neg = encode_key(&Key::Number(-0.0));
        let pos = encode_key(&Key::Number(0.0));
        assert_eq!(&neg[1..], &[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&pos[1..], &[0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(compare_keys(&neg, &pos), -1);
    }

    #[test]
    fn infinities_bracket_finite_numbers() {
        let low = encode_key(&Key::Number(f64::NEG_INFINITY));
        let high = encode_key(&Key::Number(f64::INFINITY));
        assert_eq!(compare_keys(&low, &encode_key(&Key::Number(f64::MIN))), -1);
        assert_eq!(compare_keys(&encode_key(&Key::Number(f64::MAX)), &high), -1);
    }

    #[test]
    fn string_with_nul_round_trips() {
        let key = Key::from("a\0b");
        let bytes = encode_key(&key);
        assert_eq!(
            bytes,
            vec![TAG_STRING, 0x00, 0x01, b'a', 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, b'b', 0x00, 0x00]
        );
        assert_eq!(decode_key(&bytes).unwrap(), key);
    }

    #[test]
    fn nul_and_u0001_stay_distinct() {
        let nul = enc("\u{0}");
        let one = enc("\u{1}");
        assert_ne!(nul, one);
        assert_eq!(decode_key(&one).unwrap(), Key::from("\u{1}"));
        assert_eq!(compare_keys(&nul, &one), -1);
    }

    #[test]
    fn string_prefix_sorts_first() {
        assert_eq!(compare_keys(&enc("a"), &enc("a\0")), -1);
        assert_eq!(compare_keys(&enc("a"), &enc("ab")), -1);
        assert_eq!(compare_keys(&enc(""), &enc("a")), -1);
    }

    #[test]
    fn binary_stuffing() {
        let bytes = encode_key(&Key::Binary(vec![0, 1, 0xFF]));
        assert_eq!(bytes, vec![TAG_BINARY, 0x00, 0x01, 0x01, 0xFF, 0x00, 0x00]);
        assert_eq!(
            compare_keys(
                &encode_key(&Key::Binary(vec![0])),
                &encode_key(&Key::Binary(vec![0, 0]))
            ),
            -1
        );
    }

    #[test]
    fn array_ordering() {
        let a = encode_key(&Key::Array(vec!["a".into()]));
        let ab = encode_key(&Key::Array(vec!["a".into(), "b".into()]));
        assert_eq!(compare_keys(&a, &ab), -1);

        let one_two = encode_key(&Key::Array(vec![1.into(), 2.into()]));
        let one_three = encode_key(&Key::Array(vec![1.into(), 3.into()]));
        assert_eq!(compare_keys(&one_two, &one_three), -1);
    }

    #[test]
    fn nested_array_round_trip() {
        let key = Key::Array(vec![
            Key::Array(vec![]),
            Key::Array(vec![Key::Binary(vec![0, 0]), Key::Date(-3.5)]),
            Key::from("\u{10000}"),
        ]);
        assert_eq!(decode_key(&encode_key(&key)).unwrap(), key);
    }

    #[test]
    fn decode_prefix_reports_consumed_length() {
        let mut bytes = enc("ab");
        let first_len = bytes.len();
        bytes.extend(enc(7));
        let (key, used) = decode_key_prefix(&bytes).unwrap();
        assert_eq!(key, Key::from("ab"));
        assert_eq!(used, first_len);
        assert_eq!(decode_key(&bytes[used..]).unwrap(), Key::from(7));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_key(&[]).is_err());
        assert!(decode_key(&[0x99]).is_err());
        assert!(decode_key(&[TAG_NUMBER, 1, 2]).is_err());
        assert!(decode_key(&[TAG_BINARY, 0x00, 0x07]).is_err());
        assert!(decode_key(&[TAG_ARRAY, TAG_NUMBER]).is_err());
        let mut trailing = enc(1);
        trailing.push(0);
        assert!(decode_key(&trailing).is_err());
    }

    #[test]
    fn prefix_successor_increments_last_byte() {
        assert_eq!(prefix_successor(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_successor(&[]), None);
    }

    #[test]
    fn prefix_successor_bounds_composite_entries() {
        let index_key = enc("k");
        let upper = prefix_successor(&index_key).unwrap();
        let mut composite = index_key.clone();
        composite.extend(enc(Key::Array(vec![])));
        assert!(composite < upper);
        assert!(enc("k\0") >= upper);
    }
}
