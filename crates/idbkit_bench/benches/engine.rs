//! Engine operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use idbkit_bench::{open_items, record};
use idbkit_core::{CursorDirection, Factory, Key, KeyRange, RequestResult, TransactionMode};

/// Benchmark one put per transaction.
fn bench_single_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_put");

    for size in [64, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let factory = Factory::in_memory();
            let db = open_items(&factory);
            let mut id = 0;

            b.iter(|| {
                id += 1;
                let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
                txn.object_store("items")
                    .unwrap()
                    .put(black_box(&record(id, size)))
                    .unwrap();
                factory.run_until_idle();
            });
        });
    }
    group.finish();
}

/// Benchmark many puts in one transaction.
fn bench_batch_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_put");

    for batch in [10u32, 100, 1000] {
        group.throughput(Throughput::Elements(u64::from(batch)));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let factory = Factory::in_memory();
            let db = open_items(&factory);
            let records: Vec<_> = (0..batch).map(|id| record(id, 256)).collect();

            b.iter(|| {
                let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
                let store = txn.object_store("items").unwrap();
                for value in &records {
                    store.put(value).unwrap();
                }
                factory.run_until_idle();
            });
        });
    }
    group.finish();
}

/// Benchmark point reads and a full cursor walk.
fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let factory = Factory::in_memory();
    let db = open_items(&factory);
    {
        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        for id in 0..1000 {
            store.put(&record(id, 256)).unwrap();
        }
        factory.run_until_idle();
    }

    group.bench_function("get", |b| {
        let mut id = 0;
        b.iter(|| {
            id = (id + 7) % 1000;
            let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
            let request = txn.object_store("items").unwrap().get(Key::from(id)).unwrap();
            factory.run_until_idle();
            black_box(request.result());
        });
    });

    group.bench_function("get_all_100", |b| {
        b.iter(|| {
            let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
            let range = KeyRange::bound(Key::from(100), Key::from(199), false, false).unwrap();
            let request = txn
                .object_store("items")
                .unwrap()
                .get_all(Some(range), None)
                .unwrap();
            factory.run_until_idle();
            black_box(request.result());
        });
    });

    group.throughput(Throughput::Elements(1000));
    group.bench_function("cursor_walk", |b| {
        b.iter(|| {
            let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
            let request = txn
                .object_store("items")
                .unwrap()
                .open_cursor(None, CursorDirection::Next)
                .unwrap();
            request.on_success(|event| {
                if let Some(cursor) = event.result().and_then(RequestResult::into_cursor) {
                    let _ = cursor.continue_key(None);
                }
            });
            factory.run_until_idle();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_single_put, bench_batch_put, bench_reads);
criterion_main!(benches);
