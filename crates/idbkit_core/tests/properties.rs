//! Property tests over the public engine surface.

mod common;

use common::{open_with, settle, store_keys};
use idbkit_core::{
    CursorDirection, Factory, Key, KeyRange, ObjectStoreParameters, RequestResult,
    TransactionMode, Value,
};
use proptest::prelude::*;

fn arb_key() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![
        (-1e6f64..1e6).prop_map(Key::Number),
        "[a-c]{0,3}".prop_map(Key::String),
        prop::collection::vec(0u8..3, 0..3).prop_map(Key::Binary),
    ];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop::collection::vec(inner, 0..3).prop_map(Key::Array)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn cursors_visit_keys_in_order(keys in prop::collection::vec(arb_key(), 1..24)) {
        let factory = Factory::in_memory();
        let db = open_with(&factory, "p", 1, |db, _| {
            db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
        });
        let store = db
            .transaction(&["s"], TransactionMode::ReadWrite)
            .unwrap()
            .object_store("s")
            .unwrap();
        for key in &keys {
            store.put_with_key(&Value::Null, key.clone()).unwrap();
        }
        factory.run_until_idle();
        let mut expected = keys.clone();
        expected.sort();
        expected.dedup();

        let read = || {
            db.transaction(&["s"], TransactionMode::ReadOnly)
                .unwrap()
                .object_store("s")
                .unwrap()
        };
        prop_assert_eq!(store_keys(&factory, &read(), CursorDirection::Next), expected.clone());
        expected.reverse();
        prop_assert_eq!(store_keys(&factory, &read(), CursorDirection::Prev), expected);
    }

    #[test]
    fn range_counts_match_includes(
        keys in prop::collection::vec(arb_key(), 0..24),
        a in arb_key(),
        b in arb_key(),
        lower_open in any::<bool>(),
        upper_open in any::<bool>(),
    ) {
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        let Ok(range) = KeyRange::bound(lower, upper, lower_open, upper_open) else {
            return Ok(());
        };
        let factory = Factory::in_memory();
        let db = open_with(&factory, "p", 1, |db, _| {
            db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
        });
        let store = db
            .transaction(&["s"], TransactionMode::ReadWrite)
            .unwrap()
            .object_store("s")
            .unwrap();
        for key in &keys {
            store.put_with_key(&Value::Null, key.clone()).unwrap();
        }
        let count = store.count(Some(range.clone())).unwrap();
        let mut distinct = keys.clone();
        distinct.sort();
        distinct.dedup();
        let expected = distinct.iter().filter(|k| range.includes(k)).count() as u64;
        prop_assert_eq!(settle(&factory, &count).unwrap().as_count(), Some(expected));
    }

    #[test]
    fn cmp_agrees_with_key_order(a in arb_key(), b in arb_key()) {
        let factory = Factory::in_memory();
        let expected = match a.cmp(&b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        prop_assert_eq!(factory.cmp(&a, &b), expected);
    }
}

#[test]
fn get_all_honours_count() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "p", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::new()).unwrap();
    });
    let store = db
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap()
        .object_store("s")
        .unwrap();
    for k in 0..5 {
        store.put_with_key(&Value::from(k), k).unwrap();
    }
    let first_two = store.get_all_keys(None, Some(2)).unwrap();
    let everything = store.get_all(None, Some(0)).unwrap();
    factory.run_until_idle();
    assert_eq!(
        first_two.result().and_then(RequestResult::into_keys),
        Some(vec![Key::from(0), Key::from(1)])
    );
    assert_eq!(
        everything
            .result()
            .and_then(RequestResult::into_values)
            .map(|v| v.len()),
        Some(5)
    );
}
