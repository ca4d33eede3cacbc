//! Bounded fan-out/fan-in worker pool.
//!
//! `run_batch` executes one function over a batch of items on up to
//! `workers` scoped threads and blocks until every item has finished. Items
//! are handed out through a crossbeam channel, so a slow item does not hold
//! back the others. Each item's error (or panic) is returned in its own slot;
//! siblings in the same batch always run to completion, and nothing is retried.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::{bounded, unbounded};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Default)]
struct PoolCounters {
    batches: AtomicU64,
    items: AtomicU64,
    largest_batch: AtomicUsize,
}

/// Point-in-time copy of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub batches: u64,
    pub items: u64,
    pub largest_batch: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            batches: self.counters.batches.load(Ordering::Relaxed),
            items: self.counters.items.load(Ordering::Relaxed),
            largest_batch: self.counters.largest_batch.load(Ordering::Relaxed),
        }
    }

    /// Run `f` over `items` and return the results in input order.
    pub fn run_batch<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<PipelineResult<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> PipelineResult<R> + Sync,
    {
        let n = items.len();
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters.items.fetch_add(n as u64, Ordering::Relaxed);
        self.counters.largest_batch.fetch_max(n, Ordering::Relaxed);

        let threads = self.workers.min(n);
        if threads <= 1 {
            return items.into_iter().map(|item| call_guarded(&f, item)).collect();
        }

        let (item_tx, item_rx) = bounded::<(usize, T)>(n);
        for pair in items.into_iter().enumerate() {
            // Capacity is n and the receiver is alive, so this cannot fail
            let _ = item_tx.send(pair);
        }
        drop(item_tx);

        let (result_tx, result_rx) = unbounded::<(usize, PipelineResult<R>)>();
        thread::scope(|scope| {
            for _ in 0..threads {
                let item_rx = item_rx.clone();
                let result_tx = result_tx.clone();
                let f = &f;
                scope.spawn(move || {
                    for (slot, item) in item_rx.iter() {
                        let _ = result_tx.send((slot, call_guarded(f, item)));
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<PipelineResult<R>>> = (0..n).map(|_| None).collect();
        for (slot, result) in result_rx.try_iter() {
            slots[slot] = Some(result);
        }
        slots
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(PipelineError::WorkerPanic("result lost".to_string())))
            })
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

/// Run `f`, turning a panic into [`PipelineError::WorkerPanic`].
pub(crate) fn call_guarded<T, R, F>(f: &F, item: T) -> PipelineResult<R>
where
    F: Fn(T) -> PipelineResult<R>,
{
    match catch_unwind(AssertUnwindSafe(|| f(item))) {
        Ok(result) => result,
        Err(payload) => Err(PipelineError::WorkerPanic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
