// src/rebase/pool.rs
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::info;

use crate::error::BatchError;

const PROGRESS_EVERY: usize = 100;

/// Fixed-size pool shared by the scan and rebase phases of one batch. The
/// thread count does not depend on how many files there are.
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// `workers == 0` means one thread per logical CPU.
    pub fn new(workers: usize) -> Result<Self, BatchError> {
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rebase-worker-{i}"))
            .build()?;
        Ok(WorkerPool { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over every item on the pool. Results come back in input order
    /// regardless of completion order.
    pub fn map<T, R, F>(&self, phase: &'static str, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        let total = items.len();
        let done = AtomicUsize::new(0);
        let start = Instant::now();
        let results = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let r = f(item);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % PROGRESS_EVERY == 0 {
                        info!(phase, "{}/{} files", n, total);
                    }
                    r
                })
                .collect()
        });
        info!(phase, files = total, elapsed = ?start.elapsed(), "phase complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_workers_means_cpu_count() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.workers(), num_cpus::get());
    }

    #[test]
    fn map_keeps_input_order() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<u64> = (0..250).collect();
        let out = pool.map("test", &items, |i| {
            // Later items finish first.
            thread::sleep(Duration::from_micros(250 - *i));
            i * 2
        });
        assert_eq!(out, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn concurrency_is_bounded_by_worker_count() {
        let pool = WorkerPool::new(3).unwrap();
        let names = Mutex::new(HashSet::new());
        let items: Vec<u32> = (0..64).collect();
        pool.map("test", &items, |_| {
            let name = thread::current().name().unwrap_or_default().to_string();
            names.lock().unwrap().insert(name);
            thread::sleep(Duration::from_millis(1));
        });
        let names = names.into_inner().unwrap();
        assert!(names.len() <= 3);
        assert!(names.iter().all(|n| n.starts_with("rebase-worker-")));
    }
}
