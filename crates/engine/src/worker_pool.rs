//! Optional bounded worker pool for parallel storage I/O (spec §5: queues
//! "may offload storage calls to a bounded pool of worker threads").
//!
//! Each of the four queues defaults to `None` here and processes its batch
//! inline on its own single worker thread (`readWorkerPoolSize` /
//! `writeWorkerPoolSize` default to `0`, spec.md §6). An embedder whose
//! storage backend benefits from intra-batch parallelism can size a pool;
//! jobs within one batch then run concurrently across the pool's threads,
//! with the queue's own worker blocking until the whole batch drains.

use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small fixed pool of threads pulling closures off a shared channel.
pub struct WorkerPool {
    sender: Sender<Job>,
    _workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads sharing one job channel.
    ///
    /// # Panics
    /// Panics if `size` is `0`; callers check the relevant
    /// `Config::read_worker_pool_size` / `write_worker_pool_size` field
    /// (`0` means "no pool") before constructing one.
    pub fn new(name: &'static str, size: usize) -> Arc<Self> {
        assert!(size > 0, "worker pool size must be non-zero");
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..size)
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || loop {
                        let job = rx.lock().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn worker pool thread")
            })
            .collect();
        Arc::new(WorkerPool {
            sender: tx,
            _workers: workers,
        })
    }

    /// Run every job concurrently across the pool, blocking until all have
    /// completed. Preserves the "one batch finishes before the next starts"
    /// guarantee the queue's own worker loop relies on.
    pub fn run_all(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let remaining = Arc::new((Mutex::new(jobs.len()), Condvar::new()));
        for job in jobs {
            let remaining = remaining.clone();
            let sent = self.sender.send(Box::new(move || {
                job();
                let (count, cvar) = &*remaining;
                let mut count = count.lock();
                *count -= 1;
                if *count == 0 {
                    cvar.notify_all();
                }
            }));
            if sent.is_err() {
                let (count, cvar) = &*remaining;
                let mut count = count.lock();
                *count -= 1;
                if *count == 0 {
                    cvar.notify_all();
                }
            }
        }
        let (count, cvar) = &*remaining;
        let mut count = count.lock();
        while *count > 0 {
            cvar.wait(&mut count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_all_executes_every_job_and_waits() {
        let pool = WorkerPool::new("test-pool", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..20)
            .map(|_| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        pool.run_all(jobs);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn run_all_on_empty_batch_returns_immediately() {
        let pool = WorkerPool::new("test-pool-empty", 2);
        pool.run_all(Vec::new());
    }
}
