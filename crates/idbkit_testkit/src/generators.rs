//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values and store operations.

use idbkit_codec::{Key, KeyPath, Value};
use proptest::prelude::*;

/// Strategy for valid keys of every kind, nested up to three levels.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![
        any::<f64>()
            .prop_filter("NaN is not a key", |n| !n.is_nan())
            .prop_map(Key::Number),
        (-8.64e15f64..8.64e15).prop_map(Key::Date),
        ".{0,12}".prop_map(Key::String),
        prop::collection::vec(any::<u8>(), 0..12).prop_map(Key::Binary),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for small integer keys, so that operations collide.
pub fn small_key_strategy() -> impl Strategy<Value = Key> {
    (0u32..32).prop_map(Key::from)
}

/// Strategy for property names.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,7}").expect("Invalid regex")
}

/// Strategy for valid key paths: a single identifier chain or a list.
pub fn key_path_strategy() -> impl Strategy<Value = KeyPath> {
    let path = || {
        prop::collection::vec(identifier_strategy(), 1..4).prop_map(|parts: Vec<String>| parts.join("."))
    };
    prop_oneof![
        3 => path().prop_map(|p: String| KeyPath::parse(&p).expect("Invalid key path")),
        1 => prop::collection::vec(path(), 1..3)
            .prop_map(|paths| KeyPath::parse_array(paths.as_slice()).expect("Invalid key path")),
    ]
}

/// Strategy for storable values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<f64>().prop_map(Value::Number),
        ".{0,16}".prop_map(Value::String),
        any::<f64>().prop_map(Value::Date),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Binary),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec((identifier_strategy(), inner), 0..4).prop_map(Value::object),
        ]
    })
}

/// An operation against a single object store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Put a record
    Put {
        /// Primary key
        key: Key,
        /// Indexed tag
        tag: u32,
        /// Record payload
        payload: Value,
    },
    /// Add a record, failing if the key exists
    Add {
        /// Primary key
        key: Key,
        /// Indexed tag
        tag: u32,
    },
    /// Delete one record
    Delete {
        /// Primary key
        key: Key,
    },
    /// Delete every record in `lower..=upper`
    DeleteRange {
        /// Lower bound
        lower: Key,
        /// Upper bound
        upper: Key,
    },
    /// Remove every record
    Clear,
}

/// Strategy for store operations over a small key space.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        6 => (small_key_strategy(), 0u32..4, value_strategy())
            .prop_map(|(key, tag, payload)| StoreOperation::Put { key, tag, payload }),
        2 => (small_key_strategy(), 0u32..4)
            .prop_map(|(key, tag)| StoreOperation::Add { key, tag }),
        3 => small_key_strategy().prop_map(|key| StoreOperation::Delete { key }),
        1 => (small_key_strategy(), small_key_strategy()).prop_map(|(a, b)| {
            let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
            StoreOperation::DeleteRange { lower, upper }
        }),
        1 => Just(StoreOperation::Clear),
    ]
}

/// Strategy for a sequence of store operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
