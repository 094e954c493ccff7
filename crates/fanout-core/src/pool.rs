//! Delivery worker pool.
//!
//! A thin wrapper over a core-scoped rayon thread pool. Rayon gives each
//! worker its own lock-free deque with work stealing; this wrapper adds the
//! one thing shutdown needs that rayon does not provide: a way to wait for
//! every task enqueued so far to finish ([`drain`](WorkerPool::drain)).
//!
//! Enqueueing never blocks and never applies backpressure; `publish`
//! returns as soon as its delivery tasks are queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::Error;

struct InFlight {
    count: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

/// Work-stealing pool executing subscriber deliveries.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
}

impl WorkerPool {
    /// Builds a pool with `threads` workers; `0` sizes the pool to the
    /// host's available parallelism.
    ///
    /// # Errors
    ///
    /// [`Error::Unknown`] if the pool threads cannot be spawned.
    pub fn new(threads: usize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fanout-worker-{i}"))
            .build()
            .map_err(|_| Error::Unknown)?;

        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight {
                count: AtomicUsize::new(0),
                lock: Mutex::new(()),
                drained: Condvar::new(),
            }),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks enqueued or running right now.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Enqueues `task` without blocking.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let tracker = Arc::clone(&self.in_flight);
        tracker.count.fetch_add(1, Ordering::AcqRel);

        self.pool.spawn(move || {
            task();

            if tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
                // Last task out: wake any drain() waiters. The lock pairs
                // the decrement with the condvar wait below.
                let _guard = tracker.lock.lock();
                tracker.drained.notify_all();
            }
        });
    }

    /// Blocks until every task enqueued so far has completed.
    ///
    /// Tasks enqueued while draining are waited for as well; the caller is
    /// responsible for stopping new enqueues first if it needs convergence.
    pub fn drain(&self) {
        let mut guard = self.in_flight.lock.lock();

        while self.in_flight.count.load(Ordering::Acquire) != 0 {
            self.in_flight.drained.wait(&mut guard);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn test_pool_sizes_to_hardware_by_default() {
        let pool = WorkerPool::new(0).unwrap();
        assert!(pool.threads() >= 1);
    }

    #[test]
    fn test_spawn_executes_tasks() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_drain_waits_for_slow_tasks() {
        let pool = WorkerPool::new(4).unwrap();
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..8 {
            let done = Arc::clone(&done);
            pool.spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.drain();
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_drain_on_idle_pool_returns() {
        let pool = WorkerPool::new(1).unwrap();
        pool.drain();
    }

    #[test]
    fn test_spawn_does_not_block_when_saturated() {
        let pool = WorkerPool::new(1).unwrap();
        let release = Arc::new(AtomicU64::new(0));

        // Occupy the single worker.
        let gate = Arc::clone(&release);
        pool.spawn(move || {
            while gate.load(Ordering::SeqCst) == 0 {
                std::thread::yield_now();
            }
        });

        // These enqueues must return immediately despite the busy worker.
        for _ in 0..32 {
            pool.spawn(|| {});
        }
        assert!(pool.in_flight() >= 1);

        release.store(1, Ordering::SeqCst);
        pool.drain();
    }
}
