//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use idbkit_codec::CodecError;
use idbkit_core::{read_schemas, DatabaseSchema, IdbError};
use idbkit_storage::{FileBackend, FileBackendOptions, StorageError};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The log could not be opened or read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A schema record could not be decoded.
    #[error(transparent)]
    Schema(#[from] IdbError),

    /// A stored key or value could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Output could not be rendered.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A named database or store does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

/// Opens an existing log without creating it.
pub fn open_existing(path: &Path) -> Result<FileBackend, CliError> {
    if !path.exists() {
        return Err(CliError::NotFound(format!("log {}", path.display())));
    }
    let backend = FileBackend::open(path, FileBackendOptions::default().create_if_missing(false))?;
    debug!(
        path = %path.display(),
        records = backend.recovery_stats().records,
        "opened log"
    );
    Ok(backend)
}

/// Reads one database schema by name.
pub fn find_database(backend: &FileBackend, name: &str) -> Result<DatabaseSchema, CliError> {
    read_schemas(backend)?
        .into_iter()
        .find(|schema| schema.name() == name)
        .ok_or_else(|| CliError::NotFound(format!("database '{name}'")))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use idbkit_core::{
        Config, Factory, IndexParameters, KeyPath, ObjectStoreParameters, TransactionMode, Value,
    };
    use std::path::Path;

    /// Writes a small file-backed database named `library`.
    pub fn write_library(path: &Path) {
        let factory = Factory::open_file(path, Config::default()).unwrap();
        let open = factory.open("library", Some(2)).unwrap();
        open.on_upgrade_needed(|event| {
            let db = event.database().unwrap();
            let params = ObjectStoreParameters::new()
                .key_path(KeyPath::parse("id").unwrap())
                .auto_increment(true);
            let books = db.create_object_store("books", params).unwrap();
            books
                .create_index(
                    "by_tag",
                    KeyPath::parse("tags").unwrap(),
                    IndexParameters::new().multi_entry(true),
                )
                .unwrap();
        });
        factory.run_until_idle();
        let db = open.result().unwrap().into_database().unwrap();
        let books = db
            .transaction(&["books"], TransactionMode::ReadWrite)
            .unwrap()
            .object_store("books")
            .unwrap();
        for tags in [vec!["a", "b"], vec!["b"]] {
            let tags = Value::Array(tags.into_iter().map(Value::from).collect());
            books.add(&Value::object([("tags", tags)])).unwrap();
        }
        factory.run_until_idle();
    }
}
