//! Log encoding, replay and compaction benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use txdb_core::log::{encode_frame, LogRecord};
use txdb_core::{Config, TxLogEngine};
use txdb_storage::InMemoryBackend;
use txdb_testkit::random_entries;

fn commit_record(count: usize, size: usize, seed: u64) -> LogRecord {
    LogRecord::Commit {
        writes: random_entries(count, size, seed)
            .into_iter()
            .map(|r| (r.txid, r.payload))
            .collect(),
        deletes: Vec::new(),
    }
}

/// Builds a log of `commits` commit records of `per_commit` writes each.
fn build_log(commits: usize, per_commit: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for seed in 0..commits as u64 {
        data.extend(encode_frame(&commit_record(per_commit, 128, seed)).unwrap());
    }
    data
}

/// Benchmark framing commit records.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_commit");

    for writes in [1, 10, 100].iter() {
        let record = commit_record(*writes, 256, 3);
        group.throughput(Throughput::Bytes((*writes * 256) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writes), &record, |b, record| {
            b.iter(|| black_box(encode_frame(black_box(record)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark replaying a log into a fresh engine.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    group.sample_size(20);

    for commits in [10, 100, 1000].iter() {
        let data = build_log(*commits, 10);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(commits), &data, |b, data| {
            b.iter(|| {
                let backend = InMemoryBackend::with_data(data.clone());
                let (engine, report) = TxLogEngine::open(Box::new(backend), &Config::default()).unwrap();
                black_box((engine.tx_count(), report.records));
            });
        });
    }
    group.finish();
}

/// Benchmark compacting a log where most records were deleted.
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(20);

    for commits in [10, 100].iter() {
        let mut data = build_log(*commits, 10);
        let deletes = (0..*commits as u64)
            .flat_map(|seed| random_entries(8, 128, seed))
            .map(|r| r.txid)
            .collect();
        data.extend(
            encode_frame(&LogRecord::Commit {
                writes: Vec::new(),
                deletes,
            })
            .unwrap(),
        );

        group.bench_with_input(BenchmarkId::from_parameter(commits), &data, |b, data| {
            b.iter(|| {
                let backend = InMemoryBackend::with_data(data.clone());
                let (mut engine, _) = TxLogEngine::open(Box::new(backend), &Config::default()).unwrap();
                let mut target = InMemoryBackend::new();
                let compacted = engine.write_compacted(&mut target).unwrap();
                engine.install_compacted(Box::new(target), compacted).unwrap();
                black_box(engine.log_size());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_replay, bench_compact);
criterion_main!(benches);
