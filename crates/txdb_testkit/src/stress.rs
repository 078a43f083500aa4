//! Stress helpers for the transaction store.
//!
//! These drive the store and its background writer under load: many
//! producers queueing at once, and add/remove churn in random order.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use txdb_core::{
    AsyncMempoolTxDb, MempoolTxDb, TransactionWrapper, TransactionWrapperRef, TxData, TxRecord,
};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to push through the store.
    pub operations: usize,
    /// Number of concurrent producers.
    pub threads: usize,
    /// Payload size in bytes.
    pub tx_size: usize,
    /// Seed for payloads and orderings.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            tx_size: 256,
            seed: 0x7478_6462,
        }
    }
}

/// Builds `count` random transactions of `size` bytes from `seed`.
pub fn random_entries(count: usize, size: usize, seed: u64) -> Vec<TxRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut payload = vec![0u8; size.max(8)];
            rng.fill(payload.as_mut_slice());
            TxRecord::from_payload(payload)
        })
        .collect()
}

/// Commits every transaction in its own batch.
pub fn stress_sequential_commits(db: &MempoolTxDb, config: &StressConfig) -> StressTestResult {
    let entries = random_entries(config.operations, config.tx_size, config.seed);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for entry in &entries {
        match db.write(entry.txid, entry.payload.clone()) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Queues adds from `config.threads` producers at once, one wrapper per
/// request, then waits for the writer to catch up.
///
/// Returns the wrappers so callers can check residency.
pub fn stress_concurrent_adds(
    txdb: &AsyncMempoolTxDb,
    config: &StressConfig,
) -> (StressTestResult, Vec<TransactionWrapperRef>) {
    let db = txdb.database();
    let wrappers: Vec<TransactionWrapperRef> = random_entries(config.operations, config.tx_size, config.seed)
        .into_iter()
        .map(|record| Arc::new(TransactionWrapper::new(record, &db)))
        .collect();
    let threads = config.threads.max(1);
    let chunk = wrappers.len().div_ceil(threads).max(1);

    let start = Instant::now();
    let (successful, failed) = thread::scope(|scope| {
        let handles: Vec<_> = wrappers
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || {
                    let mut ok = 0usize;
                    for wrapper in part {
                        if txdb.add(vec![Arc::clone(wrapper)]).is_ok() {
                            ok += 1;
                        }
                    }
                    (ok, part.len() - ok)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, 0)))
            .fold((0, 0), |(s, f), (ok, bad)| (s + ok, f + bad))
    });
    let failed = failed + usize::from(txdb.sync().is_err());

    (StressTestResult::new(successful, failed, start.elapsed()), wrappers)
}

/// Adds every entry, then removes them all in a shuffled order split
/// into random-sized requests. Syncs after each phase.
pub fn stress_churn(txdb: &AsyncMempoolTxDb, entries: &[TxRecord], seed: u64) -> StressTestResult {
    let db = txdb.database();
    let mut rng = StdRng::seed_from_u64(seed);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut tally = |ok: bool| {
        if ok {
            successful += 1;
        } else {
            failed += 1;
        }
    };

    for record in entries {
        let wrapper = Arc::new(TransactionWrapper::new(record.clone(), &db));
        tally(txdb.add(vec![wrapper]).is_ok());
    }
    tally(txdb.sync().is_ok());

    let mut removals: Vec<TxData> = entries.iter().map(TxRecord::tx_data).collect();
    removals.shuffle(&mut rng);
    let mut rest = removals.as_slice();
    while !rest.is_empty() {
        let take = rng.gen_range(1..=rest.len().min(32));
        let (head, tail) = rest.split_at(take);
        tally(txdb.remove(head.to_vec()).is_ok());
        rest = tail;
    }
    tally(txdb.sync().is_ok());

    StressTestResult::new(successful, failed, start.elapsed())
}
