//! Dump command implementation.

use super::{find_database, open_existing, CliError};
use crate::json::{key_to_json, value_to_json};
use idbkit_codec::{decode_key, deserialize_value};
use idbkit_storage::{FileBackend, ScanDirection, ScanRange, StorageBackend};
use serde_json::json;
use std::path::Path;

/// Runs the dump command, printing one JSON object per record.
pub fn run(path: &Path, database: &str, store: &str, limit: Option<usize>) -> Result<(), CliError> {
    let backend = open_existing(path)?;
    for line in dump(&backend, database, store, limit)? {
        println!("{line}");
    }
    Ok(())
}

/// Renders the records of `store` in key order.
pub fn dump(
    backend: &FileBackend,
    database: &str,
    store: &str,
    limit: Option<usize>,
) -> Result<Vec<serde_json::Value>, CliError> {
    let schema = find_database(backend, database)?;
    let store = schema
        .store_by_name(store)
        .ok_or_else(|| CliError::NotFound(format!("object store '{store}'")))?;
    let entries = backend.scan(
        &schema.store_partition(store.id()),
        &ScanRange::all(),
        ScanDirection::Forward,
        limit,
    )?;
    entries
        .iter()
        .map(|(key, value)| -> Result<serde_json::Value, CliError> {
            let key = decode_key(key)?;
            let value = deserialize_value(value)?;
            Ok(json!({ "key": key_to_json(&key), "value": value_to_json(&value) }))
        })
        .collect()
}
