//! Generic FIFO work queue with a single dedicated worker thread.
//!
//! Directly grounded on the teacher's `engine::background::BackgroundScheduler`:
//! the same lock+condvar dequeue loop, the same lock-before-notify
//! lost-wakeup prevention on both `shutdown` and the drain path, and the
//! same panic-safe completion bookkeeping via an RAII guard. Two differences
//! from the teacher, both deliberate simplifications recorded in DESIGN.md:
//! the queue is a plain `VecDeque` (FIFO) rather than a `BinaryHeap`
//! (priority), since none of the cache's four queues are priority-ordered;
//! and items are delivered to the handler in batches gathered over a
//! `batch_delay`, modeling the spec's "batch-delay timer that allows grouped
//! issuance" for the read/write queues.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Queue is at its configured depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue is at capacity ({depth}/{limit})")]
pub struct QueueFull {
    /// Current depth at time of refusal.
    pub depth: usize,
    /// The configured limit.
    pub limit: usize,
}

/// A point-in-time snapshot of one queue's metrics.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    /// Items currently waiting in the queue.
    pub queue_depth: usize,
    /// Batches currently being processed (0 or 1 — one worker per queue).
    pub active_batches: usize,
    /// Total items processed since the queue was created.
    pub items_processed: u64,
}

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    item_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_batches: AtomicUsize,
    items_processed: AtomicU64,
    max_depth: usize,
    batch_delay: Duration,
}

/// A single-consumer FIFO queue, backed by one dedicated worker thread that
/// calls a handler closure with batches of items.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Start a queue named `name` (used for the worker thread's name), with
    /// the given depth limit and batch-delay window, dispatching batches to
    /// `handler`.
    pub fn start(
        name: &str,
        max_depth: usize,
        batch_delay: Duration,
        mut handler: impl FnMut(Vec<T>) + Send + 'static,
    ) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            item_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_batches: AtomicUsize::new(0),
            items_processed: AtomicU64::new(0),
            max_depth,
            batch_delay,
        });

        let worker_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&worker_inner, &mut handler))
            .expect("failed to spawn queue worker thread");

        WorkQueue {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Push one item onto the queue. Refused once the queue has shut down or
    /// reached its depth limit.
    pub fn push(&self, item: T) -> Result<(), QueueFull> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(QueueFull {
                depth: self.inner.queue_depth.load(Ordering::Acquire),
                limit: self.inner.max_depth,
            });
        }
        let depth = self.inner.queue_depth.load(Ordering::Acquire);
        if depth >= self.inner.max_depth {
            return Err(QueueFull {
                depth,
                limit: self.inner.max_depth,
            });
        }
        {
            let mut q = self.inner.queue.lock();
            q.push_back(item);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.item_ready.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no batch is being processed.
    pub fn drain(&self) {
        let mut q = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_batches.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut q);
        }
    }

    /// Signal the worker to stop and join it. Any items still queued at
    /// shutdown time are processed first (the worker drains on its way out).
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _q = self.inner.queue.lock();
            self.inner.item_ready.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Current metrics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_batches: self.inner.active_batches.load(Ordering::Relaxed),
            items_processed: self.inner.items_processed.load(Ordering::Relaxed),
        }
    }
}

struct ActiveBatchGuard<'a, T> {
    inner: &'a Inner<T>,
    count: u64,
}

impl<'a, T> Drop for ActiveBatchGuard<'a, T> {
    fn drop(&mut self) {
        let prev = self.inner.active_batches.fetch_sub(1, Ordering::Release);
        self.inner
            .items_processed
            .fetch_add(self.count, Ordering::Relaxed);
        if prev == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _q = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop<T>(inner: &Inner<T>, handler: &mut impl FnMut(Vec<T>)) {
    loop {
        let batch = {
            let mut q = inner.queue.lock();
            loop {
                if let Some(first) = q.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    let mut batch = vec![first];
                    if !inner.batch_delay.is_zero() {
                        // Let a few more items accumulate before dispatching,
                        // modeling the spec's batch-delay grouped issuance.
                        let _ = inner.item_ready.wait_for(&mut q, inner.batch_delay);
                    }
                    while let Some(item) = q.pop_front() {
                        inner.queue_depth.fetch_sub(1, Ordering::Release);
                        batch.push(item);
                    }
                    inner.active_batches.fetch_add(1, Ordering::Release);
                    break batch;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.item_ready.wait(&mut q);
            }
        };

        let guard = ActiveBatchGuard {
            inner,
            count: batch.len() as u64,
        };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(batch))) {
            tracing::error!(
                "queue worker panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
        drop(guard);
    }
}
