//! Execution of queued store and index operations.
//!
//! Every operation reads through a [`TxnView`] and writes into the
//! transaction's write set. Index entries are kept in step with records:
//! a put removes the entries of the record it replaces before adding its
//! own, and a delete removes them along with the record.

use crate::engine::{Engine, MAX_GENERATED_KEY};
use crate::error::{IdbError, IdbResult};
use crate::request::{Operation, ReadKind, ResultData, Source};
use crate::schema::{index_partition, store_partition, IndexSchema, StoreSchema};
use crate::transaction::view::TxnView;
use crate::types::{IndexId, StoreId, TransactionId};
use idbkit_codec::{
    decode_key, deserialize_value, encode_key, evaluate_index_keys, inject_key, prefix_successor,
    serialize_value, Key, KeyPath, KeyRange, Value,
};
use idbkit_storage::{ScanDirection, ScanRange};
use std::collections::BTreeMap;
use std::ops::Bound;

/// `(partition, entry key)` of one index entry.
type IndexEntry = (String, Vec<u8>);

impl Engine {
    pub(crate) fn run_operation(
        &mut self,
        txn: TransactionId,
        operation: Operation,
    ) -> IdbResult<ResultData> {
        match operation {
            Operation::Read {
                source,
                range,
                kind,
            } => self.read(txn, source, &range, kind),
            Operation::Put {
                store,
                value,
                key,
                no_overwrite,
            } => self.put_record(txn, store, value, key, no_overwrite),
            Operation::Delete { store, range } => self.delete_records(txn, store, &range),
            Operation::Clear { store } => self.clear_store(txn, store),
            Operation::Iterate { cursor } => self.iterate_cursor(txn, cursor),
            Operation::PopulateIndex { store, index } => self.populate_index(txn, store, index),
        }
    }

    fn read(
        &self,
        txn: TransactionId,
        source: Source,
        range: &KeyRange,
        kind: ReadKind,
    ) -> IdbResult<ResultData> {
        let schema = self.store_schema(txn, source.store())?;
        let record = self.txn(txn)?;
        let view = TxnView::new(self.backend.as_ref(), &record.writes);
        let records = store_partition(&record.database, schema.id);

        let (partition, scan) = match source {
            Source::Store(_) => {
                let (lower, upper) = range.to_bounds();
                (records.clone(), ScanRange::new(lower, upper))
            }
            Source::Index(_, index) => {
                if !schema.indexes.contains_key(&index) {
                    return Err(IdbError::invalid_state("the index has been deleted"));
                }
                let (lower, upper) = range.to_index_bounds();
                (
                    index_partition(&record.database, index),
                    ScanRange::new(lower, upper),
                )
            }
        };

        let limit = match kind {
            ReadKind::Count => {
                let count = view.count(&partition, &scan)?;
                return Ok(ResultData::Count(count as u64));
            }
            ReadKind::Value | ReadKind::Key => Some(1),
            ReadKind::Values(count) | ReadKind::Keys(count) => {
                count.filter(|c| *c > 0).map(|c| c as usize)
            }
        };
        let entries = view.scan(&partition, &scan, ScanDirection::Forward, limit)?;

        // Primary keys of the matches, with the record bytes when at hand.
        let mut matches = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match source {
                Source::Store(_) => matches.push((decode_key(&key)?, Some(value))),
                Source::Index(..) => matches.push((decode_key(&value)?, None)),
            }
        }

        let load = |primary: &Key, bytes: Option<Vec<u8>>| -> IdbResult<Value> {
            let bytes = match bytes {
                Some(bytes) => Some(bytes),
                None => view.get(&records, &encode_key(primary))?,
            };
            match bytes {
                Some(bytes) => Ok(deserialize_value(&bytes)?),
                None => Err(IdbError::unknown(format!(
                    "index entry points at missing record {primary}"
                ))),
            }
        };

        Ok(match kind {
            ReadKind::Key => matches
                .into_iter()
                .next()
                .map_or(ResultData::Undefined, |(key, _)| ResultData::Key(key)),
            ReadKind::Keys(_) => ResultData::Keys(matches.into_iter().map(|(key, _)| key).collect()),
            ReadKind::Value => match matches.into_iter().next() {
                Some((key, bytes)) => ResultData::Value(load(&key, bytes)?),
                None => ResultData::Undefined,
            },
            ReadKind::Values(_) => ResultData::Values(
                matches
                    .into_iter()
                    .map(|(key, bytes)| load(&key, bytes))
                    .collect::<IdbResult<_>>()?,
            ),
            ReadKind::Count => ResultData::Undefined,
        })
    }

    fn put_record(
        &mut self,
        txn: TransactionId,
        store: StoreId,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> IdbResult<ResultData> {
        let schema = self.store_schema(txn, store)?;
        let key = match key {
            Some(key) => {
                if let (true, Key::Number(n)) = (schema.auto_increment, &key) {
                    self.bump_key_generator(txn, &schema, *n)?;
                }
                key
            }
            None => {
                let key = self.generate_key(txn, &schema)?;
                if let Some(KeyPath::String(path)) = &schema.key_path {
                    inject_key(&mut value, path, &key).map_err(IdbError::from_input)?;
                }
                key
            }
        };

        let bytes = serialize_value(&value).map_err(IdbError::from_input)?;
        if bytes.len() > self.config.max_value_size {
            return Err(IdbError::data(format!(
                "value of {} bytes exceeds the limit of {}",
                bytes.len(),
                self.config.max_value_size
            )));
        }

        let primary = encode_key(&key);
        let record = self.txn(txn)?;
        let database = record.database.clone();
        let records = store_partition(&database, store);
        let view = TxnView::new(self.backend.as_ref(), &record.writes);

        let existing = view.get(&records, &primary)?;
        if existing.is_some() && no_overwrite {
            return Err(IdbError::constraint(format!(
                "a record with key {key} already exists"
            )));
        }

        let mut additions = Vec::new();
        for index in schema.indexes() {
            for (partition, entry) in index_entries(&database, index, &value, &primary) {
                if index.unique && unique_conflict(&view, &partition, &entry, &primary)? {
                    return Err(IdbError::constraint(format!(
                        "index {:?} already has an entry for this key",
                        index.name
                    )));
                }
                additions.push((partition, entry));
            }
        }
        let removals = match &existing {
            Some(old) => record_index_entries(&database, &schema, &deserialize_value(old)?, &primary),
            None => Vec::new(),
        };

        let writes = &mut self.txn_mut(txn)?.writes;
        for (partition, entry) in removals {
            writes.delete(&partition, entry);
        }
        writes.put(&records, primary.clone(), bytes);
        for (partition, entry) in additions {
            writes.put(&partition, entry, primary.clone());
        }
        Ok(ResultData::Key(key))
    }

    fn generate_key(&mut self, txn: TransactionId, schema: &StoreSchema) -> IdbResult<Key> {
        let current = self.current_key_number(txn, schema)?;
        if current > MAX_GENERATED_KEY {
            return Err(IdbError::constraint(format!(
                "the key generator of {:?} is exhausted",
                schema.name
            )));
        }
        self.txn_mut(txn)?
            .key_generators
            .insert(schema.id, current + 1.0);
        Ok(Key::Number(current))
    }

    /// Moves the generator past an explicit numeric key.
    fn bump_key_generator(&mut self, txn: TransactionId, schema: &StoreSchema, key: f64) -> IdbResult<()> {
        let current = self.current_key_number(txn, schema)?;
        if key >= current {
            let next = key.floor().min(MAX_GENERATED_KEY) + 1.0;
            self.txn_mut(txn)?.key_generators.insert(schema.id, next);
        }
        Ok(())
    }

    fn delete_records(
        &mut self,
        txn: TransactionId,
        store: StoreId,
        range: &KeyRange,
    ) -> IdbResult<ResultData> {
        let schema = self.store_schema(txn, store)?;
        let record = self.txn(txn)?;
        let database = record.database.clone();
        let records = store_partition(&database, store);
        let view = TxnView::new(self.backend.as_ref(), &record.writes);

        let (lower, upper) = range.to_bounds();
        let entries = view.scan(
            &records,
            &ScanRange::new(lower, upper),
            ScanDirection::Forward,
            None,
        )?;
        let mut removals = Vec::with_capacity(entries.len());
        for (primary, bytes) in entries {
            if !schema.indexes.is_empty() {
                let value = deserialize_value(&bytes)?;
                removals.extend(record_index_entries(&database, &schema, &value, &primary));
            }
            removals.push((records.clone(), primary));
        }

        let writes = &mut self.txn_mut(txn)?.writes;
        for (partition, key) in removals {
            writes.delete(&partition, key);
        }
        Ok(ResultData::Undefined)
    }

    fn clear_store(&mut self, txn: TransactionId, store: StoreId) -> IdbResult<ResultData> {
        let schema = self.store_schema(txn, store)?;
        let record = self.txn_mut(txn)?;
        let database = record.database.clone();
        record.writes.clear(&store_partition(&database, store));
        for index in schema.indexes() {
            record.writes.clear(&index_partition(&database, index.id));
        }
        Ok(ResultData::Undefined)
    }

    /// Computes the entries of a new index from the records already stored.
    fn populate_index(
        &mut self,
        txn: TransactionId,
        store: StoreId,
        index: IndexId,
    ) -> IdbResult<ResultData> {
        // The store or index may have been deleted again before this ran.
        let Ok(schema) = self.store_schema(txn, store) else {
            return Ok(ResultData::Undefined);
        };
        let Some(index) = schema.indexes.get(&index) else {
            return Ok(ResultData::Undefined);
        };
        let record = self.txn(txn)?;
        let database = record.database.clone();
        let view = TxnView::new(self.backend.as_ref(), &record.writes);
        let entries = view.scan(
            &store_partition(&database, store),
            &ScanRange::all(),
            ScanDirection::Forward,
            None,
        )?;

        let mut seen: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut additions = Vec::new();
        for (primary, bytes) in entries {
            let value = deserialize_value(&bytes)?;
            for (partition, entry) in index_entries(&database, index, &value, &primary) {
                if index.unique {
                    let index_key = entry[..entry.len() - primary.len()].to_vec();
                    let clash = seen
                        .get(&index_key)
                        .is_some_and(|other| *other != primary)
                        || unique_conflict(&view, &partition, &entry, &primary)?;
                    if clash {
                        return Err(IdbError::constraint(format!(
                            "existing records violate the uniqueness of index {:?}",
                            index.name
                        )));
                    }
                    seen.insert(index_key, primary.clone());
                }
                additions.push((partition, entry, primary.clone()));
            }
        }

        let writes = &mut self.txn_mut(txn)?.writes;
        for (partition, entry, primary) in additions {
            writes.put(&partition, entry, primary);
        }
        Ok(ResultData::Undefined)
    }
}

/// Entries `value` contributes to `index`.
fn index_entries(database: &str, index: &IndexSchema, value: &Value, primary: &[u8]) -> Vec<IndexEntry> {
    let partition = index_partition(database, index.id);
    evaluate_index_keys(value, &index.key_path, index.multi_entry)
        .unwrap_or_default()
        .iter()
        .map(|key| {
            let mut entry = encode_key(key);
            entry.extend_from_slice(primary);
            (partition.clone(), entry)
        })
        .collect()
}

/// Entries `value` contributes to every index of a store.
fn record_index_entries(
    database: &str,
    schema: &StoreSchema,
    value: &Value,
    primary: &[u8],
) -> Vec<IndexEntry> {
    schema
        .indexes()
        .flat_map(|index| index_entries(database, index, value, primary))
        .collect()
}

/// Whether a unique index already maps the index key of `entry` to a
/// record other than `primary`.
fn unique_conflict(view: &TxnView<'_>, partition: &str, entry: &[u8], primary: &[u8]) -> IdbResult<bool> {
    let index_key = &entry[..entry.len() - primary.len()];
    let upper = prefix_successor(index_key).map_or(Bound::Unbounded, Bound::Excluded);
    let range = ScanRange::new(Bound::Included(index_key.to_vec()), upper);
    Ok(view
        .scan(partition, &range, ScanDirection::Forward, Some(2))?
        .iter()
        .any(|(_, owner)| owner.as_slice() != primary))
}
