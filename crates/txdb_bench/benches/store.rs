//! Store and background writer benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use txdb_core::{AsyncMempoolTxDb, Batch, Config, MempoolTxDb, TransactionWrapper, TxData};
use txdb_testkit::random_entries;

/// Benchmark one-transaction commits.
fn bench_single_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_write");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = MempoolTxDb::open_in_memory().unwrap();
            let mut seed = 0u64;

            b.iter_batched(
                || {
                    seed += 1;
                    random_entries(1, size, seed).remove(0)
                },
                |record| {
                    db.write(record.txid, black_box(record.payload)).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark batch commits of fresh transactions.
fn bench_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let db = MempoolTxDb::open_in_memory().unwrap();
                let mut seed = 0u64;

                b.iter_batched(
                    || {
                        seed += 1;
                        let mut batch = Batch::new();
                        for record in random_entries(batch_size, 256, seed) {
                            batch.add_record(&record);
                        }
                        batch
                    },
                    |mut batch| {
                        db.commit(black_box(&mut batch)).unwrap();
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

/// Benchmark resolving batches that touch the same keys repeatedly.
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for ops in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*ops as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ops), ops, |b, &ops| {
            let records = random_entries(ops / 4, 64, 7);
            let mut batch = Batch::new();
            for i in 0..ops {
                let record = &records[i % records.len()];
                if i % 3 == 0 {
                    batch.remove(TxData::new(record.txid, record.size()));
                } else {
                    batch.add_record(record);
                }
            }

            b.iter(|| black_box(batch.resolve()));
        });
    }
    group.finish();
}

/// Benchmark payload reads from a populated store.
fn bench_read_populated(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_populated");

    for tx_count in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(tx_count), tx_count, |b, &count| {
            let db = MempoolTxDb::open_in_memory().unwrap();
            let records = random_entries(count, 256, 11);
            db.add_transactions(&records).unwrap();
            let mut i = 0usize;

            b.iter(|| {
                i = (i + 1) % records.len();
                black_box(db.get_transaction(black_box(&records[i].txid)));
            });
        });
    }
    group.finish();
}

/// Benchmark queueing many single adds through the writer and waiting.
fn bench_coalesced_adds(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesced_adds");
    group.sample_size(10);

    for count in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = tempfile::TempDir::new().unwrap();
            let config = Config::default().sync_on_commit(true);
            let txdb = AsyncMempoolTxDb::open(&dir.path().join("txdb"), config).unwrap();
            let db = txdb.database();
            let mut seed = 0u64;

            b.iter_batched(
                || {
                    seed += 1;
                    random_entries(count, 256, seed)
                        .into_iter()
                        .map(|record| Arc::new(TransactionWrapper::new(record, &db)))
                        .collect::<Vec<_>>()
                },
                |wrappers| {
                    for wrapper in wrappers {
                        txdb.add(vec![wrapper]).unwrap();
                    }
                    txdb.sync().unwrap();
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_write,
    bench_batch_write,
    bench_resolve,
    bench_read_populated,
    bench_coalesced_adds,
);

criterion_main!(benches);
