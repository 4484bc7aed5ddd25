//! Inspect command implementation.

use super::{open_existing, CliError};
use idbkit_core::{read_schemas, DatabaseSchema};
use idbkit_storage::{FileBackend, ScanRange, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Records replayed on open.
    pub log_records: usize,
    /// Bytes cut off a torn tail.
    pub truncated_bytes: u64,
    /// Databases in the log.
    pub databases: Vec<DatabaseStats>,
}

/// Statistics for a database.
#[derive(Debug, Serialize)]
pub struct DatabaseStats {
    /// Database name.
    pub name: String,
    /// Database version.
    pub version: u64,
    /// Object stores.
    pub stores: Vec<StoreStats>,
}

/// Statistics for an object store.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    /// Store name.
    pub name: String,
    /// In-line key path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// Next generated key, for stores with a key generator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key: Option<f64>,
    /// Number of records.
    pub records: usize,
    /// Indexes of the store.
    pub indexes: Vec<IndexStats>,
}

/// Statistics for an index.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    /// Index name.
    pub name: String,
    /// Key path.
    pub key_path: String,
    /// Unique flag.
    pub unique: bool,
    /// Multi-entry flag.
    pub multi_entry: bool,
    /// Number of entries.
    pub entries: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let backend = open_existing(path)?;
    let result = inspect(&backend)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects statistics for every database in the log.
pub fn inspect(backend: &FileBackend) -> Result<InspectResult, CliError> {
    let recovery = backend.recovery_stats();
    let databases = read_schemas(backend)?
        .iter()
        .map(|schema| database_stats(backend, schema))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InspectResult {
        path: backend.path().display().to_string(),
        log_size: backend.log_size(),
        log_records: recovery.records,
        truncated_bytes: recovery.truncated_bytes,
        databases,
    })
}

fn database_stats(backend: &FileBackend, schema: &DatabaseSchema) -> Result<DatabaseStats, CliError> {
    let mut stores = Vec::new();
    for store in schema.stores() {
        let mut indexes = Vec::new();
        for index in store.indexes() {
            indexes.push(IndexStats {
                name: index.name().to_string(),
                key_path: index.key_path().to_string(),
                unique: index.unique(),
                multi_entry: index.multi_entry(),
                entries: backend.count(&schema.index_partition(index.id()), &ScanRange::all())?,
            });
        }
        stores.push(StoreStats {
            name: store.name().to_string(),
            key_path: store.key_path().map(ToString::to_string),
            next_key: store.auto_increment().then(|| store.current_number()),
            records: backend.count(&schema.store_partition(store.id()), &ScanRange::all())?,
            indexes,
        });
    }
    Ok(DatabaseStats {
        name: schema.name().to_string(),
        version: schema.version(),
        stores,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Log: {}", result.path);
    println!("  Size:     {} bytes", result.log_size);
    println!("  Records:  {}", result.log_records);
    if result.truncated_bytes > 0 {
        println!("  Torn tail removed: {} bytes", result.truncated_bytes);
    }
    if result.databases.is_empty() {
        println!();
        println!("No databases");
    }
    for db in &result.databases {
        println!();
        println!("Database '{}' (version {})", db.name, db.version);
        for store in &db.stores {
            let key = store.key_path.as_deref().unwrap_or("<out-of-line>");
            print!("  {} [key {}] {} records", store.name, key, store.records);
            if let Some(next) = store.next_key {
                print!(", next key {next}");
            }
            println!();
            for index in &store.indexes {
                let mut flags = Vec::new();
                if index.unique {
                    flags.push("unique");
                }
                if index.multi_entry {
                    flags.push("multiEntry");
                }
                println!(
                    "    index {} on {} {} entries {}",
                    index.name,
                    index.key_path,
                    index.entries,
                    flags.join(" ")
                );
            }
        }
    }
}
