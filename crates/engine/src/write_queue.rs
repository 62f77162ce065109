//! Write queue & processor (component C5, spec §4.6).

use crate::policy::{guarded_spi_call, Policy, RetryDecision};
use crate::queue::WorkQueue;
use crate::read_queue::Collaborators;
use crate::return_queue::{ReturnJob, ReturnQueue};
use crate::worker_pool::WorkerPool;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use wbrb_concurrency::{CacheEntry, Status};
use wbrb_logging::{CacheMessage, Severity};

/// One unit of work for the write queue: a snapshot of an entry's cached
/// value to persist.
pub struct WriteJob<K, C, Uint> {
    /// Key being written.
    pub key: K,
    /// The entry this write is for.
    pub entry: Arc<CacheEntry<K, C, Uint>>,
    /// The cached snapshot taken when the main queue decided `WRITE`.
    pub snapshot: C,
    /// Attempts already made.
    pub attempt: u32,
}

/// Build the write queue's worker. Returns the queue wrapped in an `Arc`
/// since the worker needs to push retried jobs back onto itself — the same
/// self-referential construction the return queue uses.
pub fn start<K, V, Uext, Uint, S, C, R>(
    max_depth: usize,
    batch_delay: Duration,
    collab: Arc<Collaborators<K, V, Uext, Uint, S, C, R>>,
    return_queue: Arc<ReturnQueue<K, C, Uint>>,
    pool: Option<Arc<WorkerPool>>,
) -> Arc<WorkQueue<WriteJob<K, C, Uint>>>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    Uint: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    Uext: Send + Sync + 'static,
    S: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let self_ref: Arc<OnceCell<Arc<WorkQueue<WriteJob<K, C, Uint>>>>> = Arc::new(OnceCell::new());
    let self_ref_for_handler = self_ref.clone();

    let queue = WorkQueue::start(
        "wbrb-write-queue",
        max_depth,
        batch_delay,
        move |batch: Vec<WriteJob<K, C, Uint>>| match &pool {
            Some(pool) => {
                let jobs = batch
                    .into_iter()
                    .map(|job| {
                        let collab = collab.clone();
                        let return_queue = return_queue.clone();
                        let self_ref_for_handler = self_ref_for_handler.clone();
                        Box::new(move || {
                            process_one(&collab, &return_queue, self_ref_for_handler.get(), job);
                        }) as Box<dyn FnOnce() + Send>
                    })
                    .collect();
                pool.run_all(jobs);
            }
            None => {
                for job in batch {
                    process_one(&collab, &return_queue, self_ref_for_handler.get(), job);
                }
            }
        },
    );
    let queue = Arc::new(queue);
    let _ = self_ref.set(queue.clone());
    queue
}

fn process_one<K, V, Uext, Uint, S, C, R>(
    collab: &Collaborators<K, V, Uext, Uint, S, C, R>,
    return_queue: &ReturnQueue<K, C, Uint>,
    self_queue: Option<&Arc<WorkQueue<WriteJob<K, C, Uint>>>>,
    job: WriteJob<K, C, Uint>,
) where
    K: Clone + Eq + Hash,
    C: Clone,
{
    if job.entry.read().status() == Status::RemovedFromCache {
        return;
    }

    let split = guarded_spi_call(
        &collab.logger,
        "split_for_write",
        Severity::ExternalDataLoss,
        None,
        || {
            collab
                .adapters
                .split_for_write(&job.key, job.snapshot.clone())
                .ok()
        },
    );

    let Some((remaining, to_write)) = split else {
        collab.logger.log(
            CacheMessage::SplitForWriteFail,
            "splitForWrite failed; write abandoned",
        );
        job.entry.write().fail_write_final("splitForWrite failed");
        return_queue.push(ReturnJob {
            key: job.key,
            entry: job.entry,
            write_succeeded: false,
        });
        return;
    };

    match collab.storage.write(&job.key, to_write) {
        Ok(()) => {
            job.entry.write().complete_write_success(remaining);
            return_queue.push(ReturnJob {
                key: job.key,
                entry: job.entry,
                write_succeeded: true,
            });
        }
        Err(err) => {
            let decision = collab
                .policy
                .make_write_retry_decision(&job.key, job.attempt, &err.to_string());
            match decision {
                RetryDecision::Retry => {
                    job.entry.write().retry_write(err.to_string());
                    if let Some(queue) = self_queue {
                        let _ = queue.push(WriteJob {
                            key: job.key,
                            entry: job.entry,
                            snapshot: job.snapshot,
                            attempt: job.attempt + 1,
                        });
                    }
                }
                RetryDecision::FinalFail => {
                    collab.logger.log(
                        CacheMessage::StorageWriteFailFinal,
                        &format!("write exhausted retry budget: {err}"),
                    );
                    job.entry.write().fail_write_final(err.to_string());
                    return_queue.push(ReturnJob {
                        key: job.key,
                        entry: job.entry,
                        write_succeeded: false,
                    });
                }
            }
        }
    }
}
