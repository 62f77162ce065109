//! Return queue & processor (component C7, spec §4.7).
//!
//! After a write completes (success or final failure), the entry sits here
//! for at least `returnQueueCacheTimeMinMs` before the SPI's return-queue
//! decision runs. Built on [`crate::queue::WorkQueue`] the same way the read
//! and write queues are; the minimum dwell time is honored by the batch
//! delay (a `ReturnJob` dispatched before its dwell has elapsed is simply
//! re-pushed, mirroring `MAIN_QUEUE_REQUEUE`-style self-loops elsewhere in
//! the engine).

use crate::policy::{Policy, ReturnQueueDecision};
use crate::queue::{QueueStats, WorkQueue};
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use wbrb_concurrency::{CacheEntry, KeyRegistry};
use wbrb_logging::{CacheMessage, Logger};

/// One unit of work for the return queue.
pub struct ReturnJob<K, C, Uint> {
    /// Key whose write just completed.
    pub key: K,
    /// The entry in question.
    pub entry: Arc<CacheEntry<K, C, Uint>>,
    /// Whether the write that led here succeeded.
    pub write_succeeded: bool,
}

/// The return queue, wrapping [`WorkQueue`] with access to itself for
/// `REQUEUE_TO_RETURN_QUEUE`.
pub struct ReturnQueue<K, C, Uint> {
    inner: WorkQueue<ReturnJob<K, C, Uint>>,
}

impl<K, C, Uint> ReturnQueue<K, C, Uint>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    C: Send + Sync + 'static,
    Uint: Send + Sync + 'static,
{
    /// Start the return queue's worker.
    pub fn start(
        max_depth: usize,
        min_dwell: Duration,
        registry: Arc<KeyRegistry<K, C, Uint>>,
        policy: Arc<dyn Policy<K>>,
        logger: Arc<Logger>,
    ) -> Arc<Self> {
        let self_ref: Arc<OnceCell<Arc<ReturnQueue<K, C, Uint>>>> = Arc::new(OnceCell::new());
        let self_ref_for_handler = self_ref.clone();

        let inner = WorkQueue::start(
            "wbrb-return-queue",
            max_depth,
            min_dwell,
            move |batch: Vec<ReturnJob<K, C, Uint>>| {
                for job in batch {
                    process_one(
                        &registry,
                        &policy,
                        &logger,
                        self_ref_for_handler.get(),
                        job,
                    );
                }
            },
        );
        let queue = Arc::new(ReturnQueue { inner });
        let _ = self_ref.set(queue.clone());
        queue
    }

    /// Push one completed write's entry onto the return queue.
    pub fn push(&self, job: ReturnJob<K, C, Uint>) {
        let _ = self.inner.push(job);
    }

    /// Block until the return queue is empty and idle.
    pub fn drain(&self) {
        self.inner.drain();
    }

    /// Current queue metrics.
    pub fn stats(&self) -> QueueStats {
        self.inner.stats()
    }

    /// Signal the worker to stop and join it.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

fn process_one<K, C, Uint>(
    registry: &KeyRegistry<K, C, Uint>,
    policy: &Arc<dyn Policy<K>>,
    logger: &Logger,
    self_queue: Option<&Arc<ReturnQueue<K, C, Uint>>>,
    job: ReturnJob<K, C, Uint>,
) where
    K: Clone + Eq + Hash,
{
    let decision = policy.make_return_queue_decision(&job.key, job.write_succeeded);
    match decision {
        ReturnQueueDecision::Expire => {
            registry.remove(&job.key, &job.entry, logger);
        }
        ReturnQueueDecision::Remove => {
            registry.remove(&job.key, &job.entry, logger);
        }
        ReturnQueueDecision::RequeueToReturnQueue => {
            if let Some(queue) = self_queue {
                queue.push(job);
            }
        }
        ReturnQueueDecision::DoNothing => {}
        ReturnQueueDecision::NonStandard => {
            logger.log(
                CacheMessage::ReturnQueueNonStandard,
                "return queue processing decision was non-standard",
            );
        }
    }
}
