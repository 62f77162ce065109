//! Read queue & processor (component C4, spec §4.4).

use crate::main_queue::MainQueue;
use crate::policy::{guarded_spi_call, Policy, RetryDecision};
use crate::queue::WorkQueue;
use crate::worker_pool::WorkerPool;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use wbrb_concurrency::{CacheEntry, KeyRegistry, Status};
use wbrb_core::{Adapters, StorageError};
use wbrb_logging::{CacheMessage, Logger, Severity};

/// Handle to the main queue, resolved lazily: the main queue's own worker
/// dispatches `RESYNC` decisions onto the read queue, so neither can hold a
/// plain `Arc` to the other at construction time. Both sides share one of
/// these cells, populated once both queues exist (see `cache.rs`).
pub type MainQueueHandle<K> = Arc<OnceCell<Arc<MainQueue<K>>>>;

/// Whether a read job is the entry's very first read or a later resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// `NOT_PRESENT -> INITIAL_READ_PENDING` read.
    Initial,
    /// `READY -> READY_RESYNC_PENDING` refresh read.
    Refresh,
}

/// One unit of work for the read queue.
pub struct ReadJob<K, C, Uint> {
    /// Key being read.
    pub key: K,
    /// The entry this read is for.
    pub entry: Arc<CacheEntry<K, C, Uint>>,
    /// Initial or refresh.
    pub kind: ReadKind,
    /// Number of attempts already made (0 on first dispatch).
    pub attempt: u32,
}

/// Shared collaborators every queue processor needs.
pub struct Collaborators<K, V, Uext, Uint, S, C, R> {
    /// Embedder storage backend.
    pub storage: Arc<dyn wbrb_core::Storage<K, S, Error = StorageError>>,
    /// Embedder adapters.
    pub adapters: Arc<dyn Adapters<K, V, Uext, Uint, S, C, R>>,
    /// SPI policy.
    pub policy: Arc<dyn Policy<K>>,
    /// Logging core.
    pub logger: Arc<Logger>,
    /// Key registry.
    pub registry: Arc<KeyRegistry<K, C, Uint>>,
}

/// Build the read queue's worker. Results are delivered back into the entry
/// state machine synchronously within the handler (spec's
/// `apiStorageReadSuccess` / `apiStorageReadFail` are modeled as direct calls
/// rather than a second round-trip through another queue).
pub fn start<K, V, Uext, Uint, S, C, R>(
    max_depth: usize,
    batch_delay: Duration,
    collab: Arc<Collaborators<K, V, Uext, Uint, S, C, R>>,
    main_queue: MainQueueHandle<K>,
    main_queue_deadline_ms: impl Fn() -> u64 + Send + Sync + 'static,
    pool: Option<Arc<WorkerPool>>,
) -> WorkQueue<ReadJob<K, C, Uint>>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    Uint: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    Uext: Send + Sync + 'static,
    S: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let main_queue_deadline_ms: Arc<dyn Fn() -> u64 + Send + Sync> = Arc::new(main_queue_deadline_ms);
    WorkQueue::start(
        "wbrb-read-queue",
        max_depth,
        batch_delay,
        move |batch: Vec<ReadJob<K, C, Uint>>| match &pool {
            Some(pool) => {
                let jobs = batch
                    .into_iter()
                    .map(|job| {
                        let collab = collab.clone();
                        let main_queue = main_queue.clone();
                        let main_queue_deadline_ms = main_queue_deadline_ms.clone();
                        Box::new(move || {
                            process_one(&collab, &main_queue, main_queue_deadline_ms.as_ref(), job);
                        }) as Box<dyn FnOnce() + Send>
                    })
                    .collect();
                pool.run_all(jobs);
            }
            None => {
                for job in batch {
                    process_one(&collab, &main_queue, main_queue_deadline_ms.as_ref(), job);
                }
            }
        },
    )
}

fn process_one<K, V, Uext, Uint, S, C, R>(
    collab: &Collaborators<K, V, Uext, Uint, S, C, R>,
    main_queue: &MainQueueHandle<K>,
    main_queue_deadline_ms: &(impl Fn() -> u64 + ?Sized),
    job: ReadJob<K, C, Uint>,
) where
    K: Clone + Eq + Hash,
    C: Clone,
    Uint: Clone,
{
    let main_queue = main_queue
        .get()
        .expect("main queue must be initialized before read queue jobs run");

    // Re-validate state after taking the write lock — the queue is only a
    // hint (spec §5: "Queue-to-entry ordering").
    {
        let status = job.entry.read().status();
        if status == Status::RemovedFromCache {
            collab.logger.log(
                CacheMessage::TooManyRemovedFromCacheStateRetries,
                "read queue observed REMOVED_FROM_CACHE; dropping stale job",
            );
            return;
        }
    }

    match collab.storage.read(&job.key) {
        Ok(raw) => match job.kind {
            ReadKind::Initial => {
                let converted = guarded_spi_call(
                    &collab.logger,
                    "convert_from_storage",
                    Severity::ExternalDataLoss,
                    None,
                    || collab.adapters.convert_from_storage(&job.key, raw).ok(),
                );
                match converted {
                    Some(c) => {
                        let mut g = job.entry.write();
                        g.complete_initial_read(c);
                        drop(g);
                        main_queue.push(job.key.clone(), main_queue_deadline_ms());
                    }
                    None => handle_read_failure(
                        collab,
                        main_queue,
                        main_queue_deadline_ms,
                        job,
                        "adapter conversion failed".into(),
                    ),
                }
            }
            ReadKind::Refresh => {
                // Snapshot the pending updates into `in_flight_merge` and
                // release the write lock before calling the embedder-supplied
                // `merge`, which runs for an unbounded duration: holding the
                // lock here would block any concurrent `Cache::write()` for
                // this key for as long as the merge takes.
                let (cached_ref, to_merge) = {
                    let mut g = job.entry.write();
                    let to_merge = g.begin_in_flight_merge();
                    let cached_ref = g.payload().cached.clone();
                    (cached_ref, to_merge)
                };
                let merged = guarded_spi_call(
                    &collab.logger,
                    "merge",
                    Severity::ExternalDataLoss,
                    None,
                    || {
                        collab
                            .adapters
                            .merge(&job.key, cached_ref.as_ref(), raw, &to_merge)
                            .ok()
                    },
                );
                let mut g = job.entry.write();
                match merged {
                    Some(m) => {
                        g.complete_resync_merged(m);
                        drop(g);
                        main_queue.push(job.key.clone(), main_queue_deadline_ms());
                    }
                    None => {
                        g.resync_too_late_discard();
                        drop(g);
                        collab.logger.log(
                            CacheMessage::ResyncIsTooLate,
                            "merge impossible or update buffer overflow",
                        );
                        main_queue.push(job.key.clone(), main_queue_deadline_ms());
                    }
                }
            }
        },
        Err(err) => handle_read_failure(collab, main_queue, main_queue_deadline_ms, job, err.to_string()),
    }
}

fn handle_read_failure<K, V, Uext, Uint, S, C, R>(
    collab: &Collaborators<K, V, Uext, Uint, S, C, R>,
    main_queue: &MainQueue<K>,
    main_queue_deadline_ms: &(impl Fn() -> u64 + ?Sized),
    job: ReadJob<K, C, Uint>,
    error: String,
) where
    K: Clone + Eq + Hash,
{
    let decision = collab
        .policy
        .make_read_retry_decision(&job.key, job.attempt, &error);
    match decision {
        RetryDecision::Retry => {
            let mut g = job.entry.write();
            match job.kind {
                ReadKind::Initial => g.retry_initial_read(error),
                ReadKind::Refresh => g.retry_resync(error),
            }
        }
        RetryDecision::FinalFail => {
            let mut g = job.entry.write();
            match job.kind {
                ReadKind::Initial => {
                    g.fail_initial_read_final(error);
                }
                ReadKind::Refresh => {
                    g.fail_resync_final(error);
                    drop(g);
                    main_queue.push(job.key.clone(), main_queue_deadline_ms());
                }
            }
        }
    }
}
