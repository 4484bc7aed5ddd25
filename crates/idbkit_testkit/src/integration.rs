//! Model-based integration harness.
//!
//! Applies store operations to a real database and to an in-memory model,
//! then checks that records and index entries agree.

use crate::fixtures::{read_store, settle, write_store, TestFactory};
use crate::generators::StoreOperation;
use idbkit_codec::{serialize_value, Key, KeyRange, Value};
use idbkit_core::{Database, IndexParameters, KeyPath, ObjectStoreParameters, RequestResult};
use std::collections::BTreeMap;

const DATABASE: &str = "model";
const STORE: &str = "records";
const INDEX: &str = "by_tag";

/// Number of distinct tags the generators produce.
pub const TAG_COUNT: u32 = 4;

/// A database paired with the records it is expected to hold.
pub struct ModelHarness {
    /// The factory under test.
    pub test: TestFactory,
    /// Open connection to the model database.
    pub db: Database,
    model: BTreeMap<Key, (u32, Value)>,
}

impl ModelHarness {
    /// Creates a harness over `test` with an empty store indexed by tag.
    pub fn new(test: TestFactory) -> Self {
        let db = open_model(&test);
        Self {
            test,
            db,
            model: BTreeMap::new(),
        }
    }

    /// Creates a harness over memory.
    pub fn memory() -> Self {
        Self::new(TestFactory::memory())
    }

    /// Creates a harness over a temporary log file.
    pub fn file() -> Self {
        Self::new(TestFactory::file())
    }

    /// Applies `op` in its own transaction and updates the model.
    pub fn apply(&mut self, op: &StoreOperation) {
        let store = write_store(&self.db, STORE);
        match op {
            StoreOperation::Put { key, tag, payload } => {
                let record = record(*tag, payload.clone());
                let request = store.put_with_key(&record, key.clone()).expect("Failed to put");
                settle(&self.test, &request).expect("Put failed");
                self.model.insert(key.clone(), (*tag, record));
            }
            StoreOperation::Add { key, tag } => {
                let record = record(*tag, Value::Null);
                let request = store.add_with_key(&record, key.clone()).expect("Failed to add");
                let outcome = settle(&self.test, &request);
                if self.model.contains_key(key) {
                    let err = outcome.expect_err("Add over an existing key succeeded");
                    assert_eq!(err.name(), "ConstraintError");
                } else {
                    outcome.expect("Add failed");
                    self.model.insert(key.clone(), (*tag, record));
                }
            }
            StoreOperation::Delete { key } => {
                let request = store.delete(key.clone()).expect("Failed to delete");
                settle(&self.test, &request).expect("Delete failed");
                self.model.remove(key);
            }
            StoreOperation::DeleteRange { lower, upper } => {
                let range = KeyRange::bound(lower.clone(), upper.clone(), false, false)
                    .expect("Invalid range");
                let request = store.delete(range).expect("Failed to delete range");
                settle(&self.test, &request).expect("Delete range failed");
                self.model.retain(|key, _| key < lower || key > upper);
            }
            StoreOperation::Clear => {
                let request = store.clear().expect("Failed to clear");
                settle(&self.test, &request).expect("Clear failed");
                self.model.clear();
            }
        }
    }

    /// Asserts that the store and its index match the model.
    pub fn verify_all(&self) {
        let store = read_store(&self.db, STORE);
        let keys = store.get_all_keys(None, None).expect("Failed to read keys");
        let values = store.get_all(None, None).expect("Failed to read values");
        let index = store.index(INDEX).expect("Missing index");
        let counts: Vec<_> = (0..TAG_COUNT)
            .map(|tag| {
                index
                    .count(Some(KeyRange::only(Key::from(tag))))
                    .expect("Failed to count")
            })
            .collect();
        self.test.run_until_idle();

        let keys = keys.result().and_then(RequestResult::into_keys).expect("No keys");
        assert_eq!(keys, self.model.keys().cloned().collect::<Vec<_>>());

        let values = values
            .result()
            .and_then(RequestResult::into_values)
            .expect("No values");
        assert_eq!(values.len(), self.model.len());
        for (actual, (_, expected)) in values.iter().zip(self.model.values()) {
            assert_eq!(canonical(actual), canonical(expected));
        }

        for (tag, count) in (0..TAG_COUNT).zip(&counts) {
            let expected = self.model.values().filter(|(t, _)| *t == tag).count() as u64;
            assert_eq!(
                count.result().and_then(|r| r.as_count()),
                Some(expected),
                "Index count mismatch for tag {tag}"
            );
        }
    }

    /// Drops the connection, reopens the factory over the same log and
    /// reconnects.
    pub fn reopen(self) -> Self {
        let Self { test, db, model } = self;
        db.close();
        test.run_until_idle();
        drop(db);
        let test = test.reopen();
        let db = open_model(&test);
        Self { test, db, model }
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

fn open_model(test: &TestFactory) -> Database {
    test.open_with(DATABASE, 1, |db, _| {
        let store = db
            .create_object_store(STORE, ObjectStoreParameters::new())
            .expect("Failed to create store");
        store
            .create_index(
                INDEX,
                KeyPath::parse("tag").expect("Invalid key path"),
                IndexParameters::new(),
            )
            .expect("Failed to create index");
    })
}

fn record(tag: u32, payload: Value) -> Value {
    Value::object([("tag", Value::from(tag)), ("payload", payload)])
}

/// Bytes of the stored form, so NaN payloads compare equal.
fn canonical(value: &Value) -> Vec<u8> {
    let clone = value.structured_clone().expect("Unclonable value");
    serialize_value(&clone).expect("Unserializable value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn fixed_sequence_survives_reopen() {
        let mut harness = ModelHarness::file();
        let ops = [
            StoreOperation::Put {
                key: Key::from(1),
                tag: 0,
                payload: Value::from("a"),
            },
            StoreOperation::Put {
                key: Key::from(2),
                tag: 1,
                payload: Value::from(f64::NAN),
            },
            StoreOperation::Add {
                key: Key::from(2),
                tag: 3,
            },
            StoreOperation::Add {
                key: Key::from(5),
                tag: 1,
            },
            StoreOperation::DeleteRange {
                lower: Key::from(0),
                upper: Key::from(1),
            },
        ];
        for op in &ops {
            harness.apply(op);
        }
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 2);

        let harness = harness.reopen();
        harness.verify_all();
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn store_matches_model(ops in operation_sequence_strategy(1, 40)) {
            let mut harness = ModelHarness::memory();
            for op in &ops {
                harness.apply(op);
            }
            harness.verify_all();
        }
    }
}
