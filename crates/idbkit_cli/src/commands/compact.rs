//! Compact command implementation.

use super::{open_existing, CliError};
use idbkit_storage::FileBackend;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Log records before compaction.
    pub records_before: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    println!("Compacting {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let backend = open_existing(path)?;
    let stats = compact(&backend, dry_run)?;

    println!("  Records before: {}", stats.records_before);
    println!("  Size before:    {} bytes", stats.bytes_before);
    if !dry_run {
        let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
        println!("  Size after:     {} bytes", stats.bytes_after);
        println!(
            "  Space saved:    {} bytes ({:.1}%)",
            saved,
            if stats.bytes_before > 0 {
                saved as f64 / stats.bytes_before as f64 * 100.0
            } else {
                0.0
            }
        );
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}

/// Rewrites the log unless `dry_run` is set.
pub fn compact(backend: &FileBackend, dry_run: bool) -> Result<CompactStats, CliError> {
    let records_before = backend.recovery_stats().records;
    let bytes_before = backend.log_size();
    if !dry_run {
        backend.compact()?;
    }
    Ok(CompactStats {
        records_before,
        bytes_before,
        bytes_after: backend.log_size(),
    })
}
