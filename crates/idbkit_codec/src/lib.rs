//! # idbkit codec
//!
//! Keys, key paths, key ranges and structured values for idbkit.
//!
//! Keys encode to byte strings whose lexicographic order is exactly the
//! IndexedDB key order, which lets the storage layer keep every object store
//! and index as a plain ordered map of bytes.
//!
//! ## Usage
//!
//! ```
//! use idbkit_codec::{compare_keys, decode_key, encode_key, Key};
//!
//! let low = encode_key(&Key::from(-5));
//! let high = encode_key(&Key::from("a"));
//! assert_eq!(compare_keys(&low, &high), -1);
//! assert_eq!(decode_key(&high).unwrap(), Key::from("a"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod encoding;
mod error;
mod key;
mod keypath;
mod range;
mod value;

pub use decoder::{deserialize_value, ValueDecoder};
pub use encoder::{serialize_value, ValueEncoder};
pub use encoding::{
    compare_keys, decode_key, decode_key_prefix, encode_key, prefix_successor, sortable_bits,
    write_key, TAG_ARRAY, TAG_BINARY, TAG_DATE, TAG_NUMBER, TAG_STRING,
};
pub use error::{CodecError, CodecResult};
pub use key::{validate_key, Key, KeyKind, MAX_KEY_DEPTH};
pub use keypath::{can_inject_key, evaluate, evaluate_index_keys, extract_key, inject_key, KeyPath};
pub use range::KeyRange;
pub use value::{BufferView, SharedBuffer, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            any::<f64>()
                .prop_filter("NaN is not a key", |n| !n.is_nan())
                .prop_map(Key::Number),
            (-1e13f64..1e13).prop_map(Key::Date),
            ".{0,8}".prop_map(Key::String),
            prop::collection::vec(any::<u8>(), 0..8).prop_map(Key::Binary),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Key::Array)
        })
    }

    proptest! {
        #[test]
        fn encoding_preserves_order(a in arb_key(), b in arb_key()) {
            let expected = match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            prop_assert_eq!(compare_keys(&encode_key(&a), &encode_key(&b)), expected);
        }

        #[test]
        fn encoding_round_trips(key in arb_key()) {
            prop_assert_eq!(decode_key(&encode_key(&key)).unwrap(), key);
        }

        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
            let _ = decode_key(&bytes);
            let _ = deserialize_value(&bytes);
        }
    }
}
