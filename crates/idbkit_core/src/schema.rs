//! Database schema model and its persisted form.
//!
//! Every database has one schema record in the [`META_PARTITION`] partition,
//! keyed by the encoded database name. Records and index entries live in
//! per-store and per-index partitions named after the database and the
//! stable numeric ids of the store or index:
//!
//! ```text
//! __meta__                 encode_key(name)        -> schema record
//! db/<hex name>/store/<id> encode_key(primary key) -> serialized value
//! db/<hex name>/index/<id> encode_key(index key) ‖ encode_key(primary key)
//!                                                  -> encode_key(primary key)
//! ```

use crate::error::{IdbError, IdbResult};
use crate::types::{IndexId, StoreId};
use idbkit_codec::{deserialize_value, encode_key, serialize_value, Key, KeyPath, Value};
use idbkit_storage::{ScanDirection, ScanRange, StorageBackend};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Partition holding one schema record per database.
pub const META_PARTITION: &str = "__meta__";

/// Initial value of a key generator.
pub(crate) const INITIAL_KEY_GENERATOR: f64 = 1.0;

/// Schema of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSchema {
    pub(crate) id: IndexId,
    pub(crate) name: String,
    pub(crate) key_path: KeyPath,
    pub(crate) unique: bool,
    pub(crate) multi_entry: bool,
}

impl IndexSchema {
    /// Index id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key path evaluated against each record.
    #[must_use]
    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    /// Whether index keys must be unique.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.unique
    }

    /// Whether array keys produce one entry per element.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.multi_entry
    }
}

/// Schema of an object store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSchema {
    pub(crate) id: StoreId,
    pub(crate) name: String,
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    /// Next key the generator hands out.
    pub(crate) current_number: f64,
    pub(crate) indexes: BTreeMap<IndexId, IndexSchema>,
}

impl StoreSchema {
    /// Store id.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// In-line key path, if any.
    #[must_use]
    pub fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    /// Whether the store has a key generator.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// The next number the key generator would produce.
    #[must_use]
    pub fn current_number(&self) -> f64 {
        self.current_number
    }

    /// Indexes of this store.
    pub fn indexes(&self) -> impl Iterator<Item = &IndexSchema> {
        self.indexes.values()
    }

    /// Finds an index by name.
    #[must_use]
    pub fn index_by_name(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.values().find(|index| index.name == name)
    }

    /// Sorted index names.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.values().map(|i| i.name.clone()).collect();
        names.sort();
        names
    }
}

/// Schema of a database: its version and object stores.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub(crate) name: String,
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<StoreId, StoreSchema>,
    pub(crate) next_store_id: u64,
    pub(crate) next_index_id: u64,
}

impl DatabaseSchema {
    /// Creates an empty schema at version 0.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            stores: BTreeMap::new(),
            next_store_id: 1,
            next_index_id: 1,
        }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Object stores, in creation order.
    pub fn stores(&self) -> impl Iterator<Item = &StoreSchema> {
        self.stores.values()
    }

    /// Looks up a store by id.
    #[must_use]
    pub fn store(&self, id: StoreId) -> Option<&StoreSchema> {
        self.stores.get(&id)
    }

    /// Looks up a store by name.
    #[must_use]
    pub fn store_by_name(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.values().find(|store| store.name == name)
    }

    /// Sorted object store names.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.values().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }

    /// Storage partition holding the records of `store`.
    #[must_use]
    pub fn store_partition(&self, store: StoreId) -> String {
        store_partition(&self.name, store)
    }

    /// Storage partition holding the entries of `index`.
    #[must_use]
    pub fn index_partition(&self, index: IndexId) -> String {
        index_partition(&self.name, index)
    }

    pub(crate) fn store_mut(&mut self, id: StoreId) -> Option<&mut StoreSchema> {
        self.stores.get_mut(&id)
    }

    pub(crate) fn add_store(
        &mut self,
        name: String,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> StoreId {
        let id = StoreId::new(self.next_store_id);
        self.next_store_id += 1;
        self.stores.insert(
            id,
            StoreSchema {
                id,
                name,
                key_path,
                auto_increment,
                current_number: INITIAL_KEY_GENERATOR,
                indexes: BTreeMap::new(),
            },
        );
        id
    }

    pub(crate) fn add_index(
        &mut self,
        store: StoreId,
        name: String,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Option<IndexId> {
        let id = IndexId::new(self.next_index_id);
        let schema = self.stores.get_mut(&store)?;
        schema.indexes.insert(
            id,
            IndexSchema {
                id,
                name,
                key_path,
                unique,
                multi_entry,
            },
        );
        self.next_index_id += 1;
        Some(id)
    }

    /// Serializes the schema into its stored form.
    pub(crate) fn to_bytes(&self) -> IdbResult<Vec<u8>> {
        Ok(serialize_value(&self.to_value())?)
    }

    /// Parses a stored schema record.
    pub(crate) fn from_bytes(bytes: &[u8]) -> IdbResult<Self> {
        Self::from_value(&deserialize_value(bytes)?)
    }

    #[allow(clippy::cast_precision_loss)]
    fn to_value(&self) -> Value {
        let stores = self
            .stores
            .values()
            .map(|store| {
                let indexes = store
                    .indexes
                    .values()
                    .map(|index| {
                        Value::object([
                            ("id", Value::Number(index.id.as_u64() as f64)),
                            ("name", Value::String(index.name.clone())),
                            ("keyPath", index.key_path.to_value()),
                            ("unique", Value::Bool(index.unique)),
                            ("multiEntry", Value::Bool(index.multi_entry)),
                        ])
                    })
                    .collect();
                Value::object([
                    ("id", Value::Number(store.id.as_u64() as f64)),
                    ("name", Value::String(store.name.clone())),
                    (
                        "keyPath",
                        store.key_path.as_ref().map_or(Value::Null, KeyPath::to_value),
                    ),
                    ("autoIncrement", Value::Bool(store.auto_increment)),
                    ("currentNumber", Value::Number(store.current_number)),
                    ("indexes", Value::Array(indexes)),
                ])
            })
            .collect();

        Value::object([
            ("name", Value::String(self.name.clone())),
            ("version", Value::Number(self.version as f64)),
            ("nextStoreId", Value::Number(self.next_store_id as f64)),
            ("nextIndexId", Value::Number(self.next_index_id as f64)),
            ("stores", Value::Array(stores)),
        ])
    }

    fn from_value(value: &Value) -> IdbResult<Self> {
        let mut stores = BTreeMap::new();
        for store in array_field(value, "stores")? {
            let mut indexes = BTreeMap::new();
            for index in array_field(store, "indexes")? {
                let id = IndexId::new(integer_field(index, "id")?);
                indexes.insert(
                    id,
                    IndexSchema {
                        id,
                        name: string_field(index, "name")?,
                        key_path: KeyPath::from_value(field(index, "keyPath")?)?,
                        unique: bool_field(index, "unique")?,
                        multi_entry: bool_field(index, "multiEntry")?,
                    },
                );
            }
            let key_path = match field(store, "keyPath")? {
                Value::Null => None,
                other => Some(KeyPath::from_value(other)?),
            };
            let id = StoreId::new(integer_field(store, "id")?);
            stores.insert(
                id,
                StoreSchema {
                    id,
                    name: string_field(store, "name")?,
                    key_path,
                    auto_increment: bool_field(store, "autoIncrement")?,
                    current_number: number_field(store, "currentNumber")?,
                    indexes,
                },
            );
        }

        Ok(Self {
            name: string_field(value, "name")?,
            version: integer_field(value, "version")?,
            stores,
            next_store_id: integer_field(value, "nextStoreId")?,
            next_index_id: integer_field(value, "nextIndexId")?,
        })
    }
}

fn field<'a>(value: &'a Value, name: &str) -> IdbResult<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| IdbError::unknown(format!("schema record is missing `{name}`")))
}

fn string_field(value: &Value, name: &str) -> IdbResult<String> {
    field(value, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IdbError::unknown(format!("schema field `{name}` is not a string")))
}

fn bool_field(value: &Value, name: &str) -> IdbResult<bool> {
    field(value, name)?
        .as_bool()
        .ok_or_else(|| IdbError::unknown(format!("schema field `{name}` is not a boolean")))
}

fn number_field(value: &Value, name: &str) -> IdbResult<f64> {
    field(value, name)?
        .as_number()
        .ok_or_else(|| IdbError::unknown(format!("schema field `{name}` is not a number")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn integer_field(value: &Value, name: &str) -> IdbResult<u64> {
    let n = number_field(value, name)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(IdbError::unknown(format!(
            "schema field `{name}` is not a non-negative integer"
        )));
    }
    Ok(n as u64)
}

fn array_field<'a>(value: &'a Value, name: &str) -> IdbResult<&'a [Value]> {
    field(value, name)?
        .as_array()
        .ok_or_else(|| IdbError::unknown(format!("schema field `{name}` is not an array")))
}

/// Key of a database's schema record.
pub(crate) fn meta_key(name: &str) -> Vec<u8> {
    encode_key(&Key::String(name.to_string()))
}

/// Prefix shared by every partition of a database.
///
/// Names are hex encoded so that any string is a safe partition component.
pub(crate) fn database_prefix(name: &str) -> String {
    let mut prefix = String::with_capacity(4 + name.len() * 2);
    prefix.push_str("db/");
    for byte in name.as_bytes() {
        let _ = write!(prefix, "{byte:02x}");
    }
    prefix.push('/');
    prefix
}

/// Partition holding the records of a store.
pub(crate) fn store_partition(db: &str, store: StoreId) -> String {
    format!("{}store/{}", database_prefix(db), store.as_u64())
}

/// Partition holding the entries of an index.
pub(crate) fn index_partition(db: &str, index: IndexId) -> String {
    format!("{}index/{}", database_prefix(db), index.as_u64())
}

/// Reads the committed schema of one database.
pub(crate) fn load_schema(
    backend: &dyn StorageBackend,
    name: &str,
) -> IdbResult<Option<DatabaseSchema>> {
    backend
        .get(META_PARTITION, &meta_key(name))?
        .map(|bytes| DatabaseSchema::from_bytes(&bytes))
        .transpose()
}

/// Reads the committed schemas of every database in `backend`.
///
/// # Errors
///
/// Fails if the backend cannot be read or a schema record is corrupt.
pub fn read_schemas(backend: &dyn StorageBackend) -> IdbResult<Vec<DatabaseSchema>> {
    backend
        .scan(META_PARTITION, &ScanRange::all(), ScanDirection::Forward, None)?
        .iter()
        .map(|(_, bytes)| DatabaseSchema::from_bytes(bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbkit_storage::{InMemoryBackend, WriteBatch};

    fn sample() -> DatabaseSchema {
        let mut schema = DatabaseSchema::new("shop");
        schema.version = 3;
        let items = schema.add_store("items".into(), Some(KeyPath::parse("id").unwrap()), false);
        let log = schema.add_store("log".into(), None, true);
        schema.store_mut(log).unwrap().current_number = 17.0;
        schema
            .add_index(
                items,
                "by_tags".into(),
                KeyPath::parse("tags").unwrap(),
                false,
                true,
            )
            .unwrap();
        schema
            .add_index(
                items,
                "by_pair".into(),
                KeyPath::parse_array(&["a", "b.c"]).unwrap(),
                true,
                false,
            )
            .unwrap();
        schema
    }

    #[test]
    fn schema_record_round_trips() {
        let schema = sample();
        let bytes = schema.to_bytes().unwrap();
        assert_eq!(DatabaseSchema::from_bytes(&bytes).unwrap(), schema);
    }

    #[test]
    fn lookups_by_name() {
        let schema = sample();
        let items = schema.store_by_name("items").unwrap();
        assert_eq!(items.index_names(), vec!["by_pair", "by_tags"]);
        assert!(items.index_by_name("by_tags").unwrap().multi_entry());
        assert_eq!(schema.store_names(), vec!["items", "log"]);
        assert!(schema.store_by_name("missing").is_none());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut schema = sample();
        let first = schema.store_by_name("log").unwrap().id();
        schema.stores.remove(&first);
        let second = schema.add_store("log".into(), None, false);
        assert_ne!(first, second);
    }

    #[test]
    fn partition_names_hex_encode_the_database() {
        assert_eq!(database_prefix("a/b"), "db/612f62/");
        assert_eq!(store_partition("a", StoreId::new(2)), "db/61/store/2");
        assert_eq!(index_partition("a", IndexId::new(5)), "db/61/index/5");
        assert!(store_partition("ab", StoreId::new(1)).starts_with(&database_prefix("ab")));
        assert!(!store_partition("abc", StoreId::new(1)).starts_with(&database_prefix("ab")));
    }

    #[test]
    fn read_schemas_lists_every_database() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        for name in ["b", "a"] {
            let schema = DatabaseSchema::new(name);
            batch.put(META_PARTITION, meta_key(name), schema.to_bytes().unwrap());
        }
        backend.apply(&batch).unwrap();

        let names: Vec<String> = read_schemas(&backend)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(load_schema(&backend, "a").unwrap().is_some());
        assert!(load_schema(&backend, "c").unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_unknown_error() {
        let bytes = serialize_value(&Value::object([("name", Value::from("x"))])).unwrap();
        let err = DatabaseSchema::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.name(), "UnknownError");
    }
}
