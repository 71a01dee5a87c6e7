//! Stress helpers for ShelfDB.
//!
//! These drive one collection directory from several instances and
//! threads at once, the way cooperating processes would.

use shelfdb_core::{document, Collection, CollectionConfig, LockOwner, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
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

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Shape of a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Collection instances opened on the directory.
    pub instances: usize,
    /// Threads issuing calls through each instance.
    pub threads_per_instance: usize,
    /// Calls issued in total, spread evenly over all threads.
    pub operations: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            instances: 4,
            threads_per_instance: 5,
            operations: 200,
        }
    }
}

impl StressConfig {
    fn threads(&self) -> usize {
        (self.instances * self.threads_per_instance).max(1)
    }
}

/// Opens `config.instances` instances on `path`, each with its own lock
/// owner. The first one creates the collection.
pub fn open_instances(
    path: &Path,
    collection: &CollectionConfig,
    config: &StressConfig,
) -> Vec<Arc<Collection>> {
    (0..config.instances.max(1))
        .map(|_| {
            let instance = Collection::open_with_owner(path, collection.clone(), LockOwner::new())
                .expect("Failed to open instance");
            Arc::new(instance)
        })
        .collect()
}

/// Issues `config.operations` concurrent `new` calls across all instances.
///
/// Record `n` is `{a: n % 7, n: n}`.
pub fn stress_concurrent_new(
    instances: &[Arc<Collection>],
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads();
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let collection = Arc::clone(&instances[t % instances.len()]);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            // Spread the remainder over the first threads.
            let ops = config.operations / threads + usize::from(t < config.operations % threads);
            let first = t * (config.operations / threads) + t.min(config.operations % threads);

            thread::spawn(move || {
                for n in first..first + ops {
                    let n = n as i64;
                    let doc = document([("a", Value::from(n % 7)), ("n", Value::from(n))]);
                    match collection.new(doc) {
                        Ok(_) => {
                            successful.fetch_add(1, Ordering::Relaxed);
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
        start.elapsed(),
    )
}

/// Runs concurrent edits and drops against records created up front.
///
/// Each thread edits and then drops its own slice of the records.
pub fn stress_mixed_operations(
    instances: &[Arc<Collection>],
    config: &StressConfig,
) -> StressTestResult {
    let seed: Vec<_> = (0..config.operations as i64)
        .map(|n| document([("a", Value::from(n % 7)), ("n", Value::from(n))]))
        .collect();
    if !seed.is_empty() {
        instances[0].insert(seed).expect("Failed to seed records");
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads();
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let collection = Arc::clone(&instances[t % instances.len()]);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let operations = config.operations;

            thread::spawn(move || {
                for n in (t..operations).step_by(threads) {
                    let by_n = document([("n", n as i64)]);
                    let outcome = collection
                        .edit(&by_n, document([("edited", true)]))
                        .and_then(|_| Collection::drop(&collection, &by_n));
                    let counter = if outcome.is_ok() { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
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
        start.elapsed(),
    )
}
