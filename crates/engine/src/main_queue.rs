//! Main queue & processor (component C6, spec §4.5) — the lifecycle driver.
//!
//! Unlike the read/write/return queues, items carry a deadline rather than
//! being processed as soon as they're dequeued: each entry, once it first
//! becomes `READY`, is placed here with `deadline = now + mainQueueCacheTimeMs`.
//! The worker only pops items whose deadline has elapsed, sleeping until the
//! earliest one does. This is a distinct harness from [`crate::queue::WorkQueue`]
//! (which dispatches immediately, batched only by arrival time) since a FIFO
//! queue sorted purely by arrival order would not honor extended deadlines
//! from `MAIN_QUEUE_REQUEUE` landing behind items that haven't been requeued.
//!
//! Grounded on the teacher's `BackgroundScheduler` lock+condvar dequeue loop
//! and lost-wakeup-safe shutdown/drain, adapted from a priority-by-importance
//! heap to a deadline-ordered one.

use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// What the policy needs to know about an entry to make the main-queue
/// decision (spec §4.5: "The decision depends on current state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainQueueInput {
    /// Entry is `READY`: canonical path is `WRITE`.
    Ready,
    /// Entry is still `WRITE_PENDING` at expiry: prior write hasn't
    /// completed.
    WritePending,
    /// Entry previously hit `WRITE_FAILED_FINAL` but hasn't exceeded the
    /// configured full-cycle limit yet.
    WriteFailedFinalUnderCycleLimit,
    /// Entry has exhausted `maxFullCyclesWithoutWriteSuccess`.
    WriteFailedFinalOverCycleLimit,
}

struct Item<K> {
    deadline_ms: u64,
    sequence: u64,
    key: K,
}

impl<K> PartialEq for Item<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.sequence == other.sequence
    }
}
impl<K> Eq for Item<K> {}
impl<K> PartialOrd for Item<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> Ord for Item<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.sequence).cmp(&(other.deadline_ms, other.sequence))
    }
}

struct Inner<K> {
    heap: Mutex<BinaryHeap<Reverse<Item<K>>>>,
    item_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    depth: AtomicUsize,
    active: AtomicUsize,
    sequence: std::sync::atomic::AtomicU64,
}

/// The deadline-ordered main queue, with its own dedicated worker thread.
pub struct MainQueue<K> {
    inner: Arc<Inner<K>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Send + 'static> MainQueue<K> {
    /// Start the main queue's worker. `now_ms` is polled on every wakeup;
    /// `process` is called with each key whose deadline has elapsed.
    pub fn start(
        now_ms: impl Fn() -> u64 + Send + Sync + 'static,
        mut process: impl FnMut(K) + Send + 'static,
    ) -> Self {
        let inner = Arc::new(Inner {
            heap: Mutex::new(BinaryHeap::new()),
            item_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            depth: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            sequence: std::sync::atomic::AtomicU64::new(0),
        });
        let worker_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("wbrb-main-queue".to_string())
            .spawn(move || worker_loop(&worker_inner, &now_ms, &mut process))
            .expect("failed to spawn main queue worker thread");
        MainQueue {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Place `key` onto the main queue with the given absolute deadline.
    pub fn push(&self, key: K, deadline_ms: u64) {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        {
            let mut heap = self.inner.heap.lock();
            heap.push(Reverse(Item {
                deadline_ms,
                sequence,
                key,
            }));
            self.inner.depth.fetch_add(1, Ordering::Release);
        }
        self.inner.item_ready.notify_one();
    }

    /// Current queue depth (items not yet popped).
    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::Relaxed)
    }

    /// Block until the queue is empty and no item is mid-processing.
    pub fn drain(&self) {
        let mut heap = self.inner.heap.lock();
        while self.inner.depth.load(Ordering::Acquire) > 0 || self.inner.active.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut heap);
        }
    }

    /// Signal shutdown and join the worker thread.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _h = self.inner.heap.lock();
            self.inner.item_ready.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

struct ActiveGuard<'a, K> {
    inner: &'a Inner<K>,
}
impl<'a, K> Drop for ActiveGuard<'a, K> {
    fn drop(&mut self) {
        let prev = self.inner.active.fetch_sub(1, Ordering::Release);
        if prev == 1 && self.inner.depth.load(Ordering::Acquire) == 0 {
            let _h = self.inner.heap.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop<K>(
    inner: &Inner<K>,
    now_ms: &(impl Fn() -> u64 + ?Sized),
    process: &mut impl FnMut(K),
) {
    loop {
        let key = {
            let mut heap = inner.heap.lock();
            loop {
                if inner.shutdown.load(Ordering::Acquire) && heap.is_empty() {
                    return;
                }
                match heap.peek() {
                    None => {
                        inner.item_ready.wait(&mut heap);
                    }
                    Some(Reverse(item)) => {
                        let now = now_ms();
                        if item.deadline_ms <= now {
                            let Reverse(item) = heap.pop().unwrap();
                            inner.depth.fetch_sub(1, Ordering::Release);
                            inner.active.fetch_add(1, Ordering::Release);
                            break item.key;
                        }
                        let wait_ms = item.deadline_ms - now;
                        let _ = inner
                            .item_ready
                            .wait_for(&mut heap, Duration::from_millis(wait_ms.min(1_000)));
                    }
                }
            }
        };

        let _guard = ActiveGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| process(key))) {
            tracing::error!(
                "main queue processing panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn processes_item_only_once_deadline_elapses() {
        let virtual_now = Arc::new(AtomicU64::new(0));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let vn = virtual_now.clone();
        let obs = observed.clone();
        let q: MainQueue<u32> =
            MainQueue::start(move || vn.load(Ordering::Acquire), move |k| obs.lock().push(k));

        q.push(1, 100);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(observed.lock().len(), 0);

        virtual_now.store(200, Ordering::Release);
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while observed.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*observed.lock(), vec![1]);
        q.shutdown();
    }

    #[test]
    fn items_processed_in_deadline_order() {
        let virtual_now = Arc::new(AtomicU64::new(1_000));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let vn = virtual_now.clone();
        let obs = observed.clone();
        let q: MainQueue<u32> =
            MainQueue::start(move || vn.load(Ordering::Acquire), move |k| obs.lock().push(k));
        q.push(3, 10);
        q.push(1, 10);
        q.push(2, 20);
        q.drain();
        let result = observed.lock().clone();
        assert_eq!(result, vec![3, 1, 2]);
        q.shutdown();
    }
}
