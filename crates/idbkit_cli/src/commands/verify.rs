//! Verify command implementation.

use super::{open_existing, CliError};
use idbkit_codec::{decode_key, deserialize_value, encode_key, evaluate_index_keys};
use idbkit_core::{read_schemas, DatabaseSchema, IndexSchema};
use idbkit_storage::{FileBackend, ScanDirection, ScanRange, StorageBackend};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Verification result for one index.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// `database/store/index`.
    pub name: String,
    /// Entries checked.
    pub entries: usize,
    /// Entries the records call for but the index lacks.
    pub missing: usize,
    /// Entries no record accounts for.
    pub extra: usize,
    /// Index keys shared by several records of a unique index.
    pub duplicates: usize,
}

impl IndexReport {
    fn is_ok(&self) -> bool {
        self.missing == 0 && self.extra == 0 && self.duplicates == 0
    }
}

/// Runs the verify command.
pub fn run(path: &Path, database: Option<&str>) -> Result<(), CliError> {
    println!("Verifying indexes in {}", path.display());
    println!();

    let backend = open_existing(path)?;
    let reports = verify(&backend, database)?;
    let mut failures = 0;
    for report in &reports {
        if report.is_ok() {
            println!("✓ {} ({} entries)", report.name, report.entries);
        } else {
            failures += 1;
            println!(
                "✗ {}: {} missing, {} extra, {} duplicate keys",
                report.name, report.missing, report.extra, report.duplicates
            );
        }
    }
    println!();
    if failures == 0 {
        println!("All {} indexes are consistent", reports.len());
    } else {
        println!("{failures} of {} indexes are inconsistent", reports.len());
    }
    Ok(())
}

/// Rebuilds every index from its store's records and compares.
pub fn verify(backend: &FileBackend, database: Option<&str>) -> Result<Vec<IndexReport>, CliError> {
    let mut reports = Vec::new();
    for schema in read_schemas(backend)? {
        if database.is_some_and(|name| name != schema.name()) {
            continue;
        }
        for store in schema.stores() {
            let records = backend.scan(
                &schema.store_partition(store.id()),
                &ScanRange::all(),
                ScanDirection::Forward,
                None,
            )?;
            for index in store.indexes() {
                let mut report = verify_index(backend, &schema, index, &records)?;
                report.name = format!("{}/{}/{}", schema.name(), store.name(), index.name());
                reports.push(report);
            }
        }
    }
    Ok(reports)
}

fn verify_index(
    backend: &FileBackend,
    schema: &DatabaseSchema,
    index: &IndexSchema,
    records: &[(Vec<u8>, Vec<u8>)],
) -> Result<IndexReport, CliError> {
    let mut expected = BTreeSet::new();
    let mut owners: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
    for (primary, bytes) in records {
        let value = deserialize_value(bytes)?;
        let Some(keys) = evaluate_index_keys(&value, index.key_path(), index.multi_entry()) else {
            continue;
        };
        for key in keys {
            let encoded = encode_key(&key);
            *owners.entry(encoded.clone()).or_default() += 1;
            let mut entry = encoded;
            entry.extend_from_slice(primary);
            expected.insert(entry);
        }
    }

    let actual = backend.scan(
        &schema.index_partition(index.id()),
        &ScanRange::all(),
        ScanDirection::Forward,
        None,
    )?;
    let mut report = IndexReport {
        entries: actual.len(),
        ..IndexReport::default()
    };
    let mut seen = BTreeSet::new();
    for (entry, primary) in &actual {
        decode_key(primary)?;
        if expected.contains(entry) && entry.ends_with(primary) {
            seen.insert(entry.clone());
        } else {
            report.extra += 1;
        }
    }
    report.missing = expected.len() - seen.len();
    if index.unique() {
        report.duplicates = owners.values().filter(|&&count| count > 1).count();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::write_library;
    use idbkit_storage::{FileBackendOptions, WriteBatch};
    use tempfile::TempDir;

    #[test]
    fn consistent_indexes_pass() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idb.log");
        write_library(&path);
        let backend = open_existing(&path).unwrap();

        let reports = verify(&backend, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "library/books/by_tag");
        assert!(reports[0].is_ok());
        assert!(verify(&backend, Some("other")).unwrap().is_empty());
    }

    #[test]
    fn stray_and_missing_entries_are_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idb.log");
        write_library(&path);

        {
            let backend = FileBackend::open(&path, FileBackendOptions::default()).unwrap();
            let schema = read_schemas(&backend).unwrap().remove(0);
            let books = schema.store_by_name("books").unwrap();
            let by_tag = books.index_by_name("by_tag").unwrap();
            let partition = schema.index_partition(by_tag.id());
            let first = backend
                .scan(&partition, &ScanRange::all(), ScanDirection::Forward, Some(1))
                .unwrap()
                .remove(0);
            let mut batch = WriteBatch::new();
            batch.delete(partition.clone(), first.0);
            let pk = encode_key(&idbkit_codec::Key::from(9));
            let mut stray = encode_key(&idbkit_codec::Key::from("z"));
            stray.extend_from_slice(&pk);
            batch.put(partition, stray, pk);
            backend.apply(&batch).unwrap();
        }

        let backend = open_existing(&path).unwrap();
        let report = verify(&backend, Some("library")).unwrap().remove(0);
        assert_eq!((report.missing, report.extra), (1, 1));
        assert!(!report.is_ok());
    }
}
