//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use idbkit_storage::{
    FileBackend, FileBackendOptions, InMemoryBackend, ScanDirection, ScanRange, StorageBackend,
    WriteBatch,
};
use tempfile::TempDir;

fn batch(start: u32, count: u32, size: usize) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for i in start..start + count {
        batch.put("bench", i.to_be_bytes().to_vec(), vec![0xab; size]);
    }
    batch
}

/// Benchmark applying batches to both backends.
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for count in [1u32, 100] {
        group.throughput(Throughput::Elements(u64::from(count)));

        group.bench_with_input(BenchmarkId::new("memory", count), &count, |b, &count| {
            let backend = InMemoryBackend::new();
            let mut next = 0;
            b.iter(|| {
                backend.apply(black_box(&batch(next, count, 256))).unwrap();
                next += count;
            });
        });

        group.bench_with_input(BenchmarkId::new("file", count), &count, |b, &count| {
            let dir = TempDir::new().unwrap();
            let backend =
                FileBackend::open(&dir.path().join("bench.log"), FileBackendOptions::default())
                    .unwrap();
            let mut next = 0;
            b.iter(|| {
                backend.apply(black_box(&batch(next, count, 256))).unwrap();
                next += count;
            });
        });
    }
    group.finish();
}

/// Benchmark range scans.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    let backend = InMemoryBackend::new();
    backend.apply(&batch(0, 10_000, 64)).unwrap();

    for limit in [10usize, 1000] {
        group.throughput(Throughput::Elements(limit as u64));
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| {
                black_box(
                    backend
                        .scan("bench", &ScanRange::all(), ScanDirection::Forward, Some(limit))
                        .unwrap(),
                );
            });
        });
    }
    group.finish();
}

/// Benchmark replaying a log on open.
fn bench_replay(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("replay.log");
    {
        let backend = FileBackend::open(&path, FileBackendOptions::default()).unwrap();
        for i in 0..100 {
            backend.apply(&batch(i * 100, 100, 64)).unwrap();
        }
    }

    c.bench_function("replay_100_records", |b| {
        b.iter(|| black_box(FileBackend::open(&path, FileBackendOptions::default()).unwrap()));
    });
}

criterion_group!(benches, bench_apply, bench_scan, bench_replay);
criterion_main!(benches);
