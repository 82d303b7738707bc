//! Stress helpers for concurrent transactions.
//!
//! Lock conflicts are expected under contention; [`with_retry`] reruns a
//! transaction with jittered backoff when a lock is refused.

use crate::fixtures::{group, group_fields};
use graphtx_core::{CoreError, CoreResult, Database, LockMode, Transaction};
use graphtx_store::Value;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Committed transactions.
    pub successful_ops: usize,
    /// Transactions that gave up.
    pub failed_ops: usize,
    /// Lock refusals that were retried.
    pub retries: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, retries: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            retries,
            duration,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Retries: {}", self.retries);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct product groups contended for.
    pub groups: i64,
    /// Attempts per transaction before giving up.
    pub max_attempts: usize,
    /// Upper bound of the random backoff between attempts.
    pub max_backoff: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            groups: 4,
            max_attempts: 50,
            max_backoff: Duration::from_millis(5),
        }
    }
}

/// Runs `f` in a fresh transaction, retrying on lock refusals.
///
/// The transaction commits when `f` returns `Ok` and aborts otherwise. A
/// [`CoreError::LockNotGranted`] from `f` or from the commit triggers a
/// retry after a random pause of up to `max_backoff`. Returns the value of
/// the committed attempt and the number of retries.
///
/// # Errors
///
/// Returns the last lock error once `max_attempts` is used up, or the
/// first error of any other kind.
pub fn with_retry<F, T>(
    db: &Database,
    max_attempts: usize,
    max_backoff: Duration,
    mut f: F,
) -> CoreResult<(T, usize)>
where
    F: FnMut(&mut Transaction) -> CoreResult<T>,
{
    let mut rng = rand::thread_rng();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match db.transaction(|tx| f(tx)) {
            Ok(value) => return Ok((value, attempt - 1)),
            Err(err @ CoreError::LockNotGranted { .. }) if attempt < max_attempts => {
                debug!(attempt, error = %err, "retrying after lock refusal");
                let nanos = u64::try_from(max_backoff.as_nanos()).unwrap_or(u64::MAX);
                if nanos > 0 {
                    thread::sleep(Duration::from_nanos(rng.gen_range(0..=nanos)));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Creates groups `0..config.groups` with a zero `counter` field.
///
/// # Errors
///
/// Fails if the groups cannot be inserted.
pub fn seed_counters(db: &Database, config: &StressConfig) -> CoreResult<()> {
    db.transaction(|tx| {
        for key in 0..config.groups {
            let mut fields = group_fields(key, "counter");
            fields.insert("counter".into(), Value::from(0_i64));
            tx.make_persistent(&group(key), fields)?;
        }
        Ok(())
    })
}

/// Sums the `counter` field over all groups.
///
/// # Errors
///
/// Fails if a group cannot be read.
pub fn counter_total(db: &Database, config: &StressConfig) -> CoreResult<i64> {
    db.transaction(|tx| {
        let mut total = 0;
        for key in 0..config.groups {
            let obj = tx.fetch(&group(key))?;
            total += obj.get("counter").and_then(|v| v.as_integer()).unwrap_or(0);
        }
        Ok(total)
    })
}

/// Concurrent read-modify-write increments of shared counters.
///
/// Every transaction reads a random counter under a READ lock and then
/// upgrades to WRITE to store the increment, so two threads on the same
/// counter deadlock and one of them has to retry. The counters' total
/// equals the number of committed transactions afterwards.
pub fn stress_counter_increments(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let retries = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let db = db.clone();
            let config = config.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let retries = Arc::clone(&retries);

            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..config.operations {
                    let id = group(rng.gen_range(0..config.groups));
                    let outcome = with_retry(&db, config.max_attempts, config.max_backoff, |tx| {
                        let current = tx
                            .fetch(&id)?
                            .get("counter")
                            .and_then(|v| v.as_integer())
                            .unwrap_or(0);
                        tx.lock(&id, LockMode::Write)?;
                        tx.set(&id, "counter", current + 1)
                    });
                    match outcome {
                        Ok(((), n)) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                            retries.fetch_add(n, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        retries.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
