//! Public API & lifecycle (component C8, spec §4.8).
//!
//! `Cache` wires the key registry, the four queues and the SPI policy into
//! the five embedder-facing operations. Grounded on the teacher's top-level
//! `database::Database` handle, which owns its background workers the same
//! way and exposes a lifecycle state machine rather than a bare `start`/`stop`
//! pair.

use crate::main_queue::{MainQueue, MainQueueInput};
use crate::policy::{guarded_spi_call, MainQueueDecision, Policy};
use crate::queue::WorkQueue;
use crate::read_queue::{self, Collaborators, MainQueueHandle, ReadJob, ReadKind};
use crate::return_queue::ReturnQueue;
use crate::worker_pool::WorkerPool;
use crate::write_queue::{self, WriteJob};
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wbrb_concurrency::{KeyRegistry, Status};
use wbrb_core::{Adapters, Config, Error, Result, Storage, StorageError};
use wbrb_logging::{CacheMessage, Logger, Severity, StatsSnapshot};

/// Lifecycle states exposed in the cache's status snapshot (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    /// Constructed but not yet serving traffic.
    NotStarted = 0,
    /// Normal operation; `is_usable()` is true only here.
    Running = 1,
    /// `flush()` in progress.
    Flushing = 2,
    /// `shutdown()` in progress.
    ShutdownInProgress = 3,
    /// Fully stopped; workers joined.
    Shutdown = 4,
}

impl ControlState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ControlState::NotStarted,
            1 => ControlState::Running,
            2 => ControlState::Flushing,
            3 => ControlState::ShutdownInProgress,
            _ => ControlState::Shutdown,
        }
    }
}

/// Point-in-time status snapshot (spec §6: "lifecycle state, liveness per
/// worker, queue sizes, counters per severity, ... per-stage totals ... and
/// per-disposition counts").
#[derive(Debug, Clone)]
pub struct CacheStatusSnapshot {
    /// Current lifecycle state.
    pub control_state: ControlState,
    /// Number of keys currently in the registry.
    pub element_count: usize,
    /// Read queue depth.
    pub read_queue_depth: usize,
    /// Write queue depth.
    pub write_queue_depth: usize,
    /// Main queue depth.
    pub main_queue_depth: usize,
    /// Return queue depth.
    pub return_queue_depth: usize,
    /// Total items the read queue has processed.
    pub reads_processed: u64,
    /// Total items the write queue has processed.
    pub writes_processed: u64,
    /// Per-severity counters and last-message text, per C1.
    pub stats: StatsSnapshot,
}

/// The WBRB cache: the embedder-facing facade over C2–C7, built on C9's
/// `Policy` and the embedder's `Storage`/`Adapters`.
pub struct Cache<K, V, Uext, Uint, S, C, R> {
    config: Config,
    registry: Arc<KeyRegistry<K, C, Uint>>,
    logger: Arc<Logger>,
    collab: Arc<Collaborators<K, V, Uext, Uint, S, C, R>>,
    read_queue: Arc<WorkQueue<ReadJob<K, C, Uint>>>,
    write_queue: Arc<WorkQueue<WriteJob<K, C, Uint>>>,
    main_queue: Arc<MainQueue<K>>,
    return_queue: Arc<ReturnQueue<K, C, Uint>>,
    control_state: AtomicU8,
}

impl<K, V, Uext, Uint, S, C, R> Cache<K, V, Uext, Uint, S, C, R>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    Uext: Send + Sync + 'static,
    Uint: Clone + Send + Sync + 'static,
    S: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Build and start a cache with the given storage, adapters, and policy.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage<K, S, Error = StorageError>>,
        adapters: Arc<dyn Adapters<K, V, Uext, Uint, S, C, R>>,
        policy: Arc<dyn Policy<K>>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(|e| Error::IllegalCacheState(e.to_string()))?;

        let logger = Arc::new(Logger::new(
            1.0,
            config.log_throttle_time_interval.as_millis(),
            config.log_throttle_max_messages_of_type_per_time_interval,
        ));
        let registry = Arc::new(KeyRegistry::new(config.max_cache_elements_hard_limit));
        registry.set_main_queue_target_size(config.main_queue_max_target_size);

        let collab = Arc::new(Collaborators {
            storage,
            adapters,
            policy: policy.clone(),
            logger: logger.clone(),
            registry: registry.clone(),
        });

        let return_queue = ReturnQueue::start(
            config.main_queue_max_target_size,
            config.return_queue_cache_time_min_ms.as_duration(),
            registry.clone(),
            policy.clone(),
            logger.clone(),
        );

        let write_pool = (config.write_worker_pool_size > 0)
            .then(|| WorkerPool::new("wbrb-write-pool", config.write_worker_pool_size));
        let read_pool = (config.read_worker_pool_size > 0)
            .then(|| WorkerPool::new("wbrb-read-pool", config.read_worker_pool_size));

        let write_queue = write_queue::start(
            config.main_queue_max_target_size,
            config.write_batch_delay_ms.as_duration(),
            collab.clone(),
            return_queue.clone(),
            write_pool,
        );

        let main_queue_handle: MainQueueHandle<K> = Arc::new(OnceCell::new());
        let main_queue_deadline_ms = {
            let logger = logger.clone();
            let interval = config.main_queue_cache_time_ms.as_millis();
            move || logger.clock().now_ms() + interval
        };

        let read_queue = Arc::new(read_queue::start(
            config.main_queue_max_target_size,
            config.read_batch_delay_ms.as_duration(),
            collab.clone(),
            main_queue_handle.clone(),
            main_queue_deadline_ms,
            read_pool,
        ));

        let max_full_cycles = config.max_full_cycles_without_write_success;
        let main_queue_interval = config.main_queue_cache_time_ms.as_millis();
        let main_queue = {
            let collab = collab.clone();
            let read_queue = read_queue.clone();
            let write_queue = write_queue.clone();
            let main_queue_handle_for_process = main_queue_handle.clone();
            let clock_now = {
                let logger = logger.clone();
                move || logger.clock().now_ms()
            };
            Arc::new(MainQueue::start(clock_now, move |key: K| {
                main_queue_process(
                    key,
                    &collab,
                    &read_queue,
                    &write_queue,
                    main_queue_handle_for_process.get(),
                    main_queue_interval,
                    max_full_cycles,
                );
            }))
        };
        let _ = main_queue_handle.set(main_queue.clone());

        let cache = Arc::new(Cache {
            config,
            registry,
            logger,
            collab,
            read_queue,
            write_queue,
            main_queue,
            return_queue,
            control_state: AtomicU8::new(ControlState::Running as u8),
        });
        Ok(cache)
    }

    /// Build a cache using [`crate::policy::DefaultPolicy`] bound to the
    /// config's retry limits.
    pub fn with_default_policy(
        config: Config,
        storage: Arc<dyn Storage<K, S, Error = StorageError>>,
        adapters: Arc<dyn Adapters<K, V, Uext, Uint, S, C, R>>,
    ) -> Result<Arc<Self>> {
        let policy = Arc::new(crate::policy::DefaultPolicy::new(
            config.read_retry_limit,
            config.write_retry_limit,
        ));
        Self::new(config, storage, adapters, policy)
    }

    fn control_state(&self) -> ControlState {
        ControlState::from_u8(self.control_state.load(Ordering::Acquire))
    }

    /// `true` only while `RUNNING` (spec §4.8).
    pub fn is_usable(&self) -> bool {
        self.control_state() == ControlState::Running
    }

    /// `true` until `shutdown()` has fully completed.
    pub fn is_alive(&self) -> bool {
        self.control_state() != ControlState::Shutdown
    }

    fn admit(&self, key: K) -> Result<Arc<wbrb_concurrency::CacheEntry<K, C, Uint>>> {
        if !self.is_alive() {
            return Err(Error::IllegalCacheState("cache is shutting down".into()));
        }
        let entry = self
            .registry
            .add(key.clone())
            .map_err(|e| Error::CacheFull { limit: e.limit })?;
        let mut g = entry.write();
        if g.status() == Status::NotPresent {
            g.begin_initial_read();
            drop(g);
            let _ = self.read_queue.push(ReadJob {
                key,
                entry: entry.clone(),
                kind: ReadKind::Initial,
                attempt: 0,
            });
        }
        Ok(entry)
    }

    /// `read(key) -> R | Error` (spec §4.8).
    pub fn read(&self, key: K) -> Result<R> {
        let entry = self.admit(key.clone())?;
        let deadline = self.logger.clock().now_ms() + self.config.read_timeout_ms.as_millis();

        loop {
            {
                let view = entry.read();
                let status = view.status();
                if status.has_servable_value() {
                    let cached = view.cached().cloned();
                    drop(view);
                    let cached = cached.expect("servable status implies cached is populated");
                    let result = guarded_spi_call(
                        &self.logger,
                        "convert_to_return_value",
                        Severity::ExternalDataLoss,
                        None,
                        || Some(self.collab.adapters.convert_to_return_value(&key, &cached)),
                    );
                    return match result {
                        Some(Ok(v)) => Ok(v),
                        Some(Err(e)) => {
                            self.logger.log(
                                CacheMessage::ConvertToReturnValueFail,
                                &format!("convert_to_return_value failed: {e}"),
                            );
                            Err(Error::IllegalExternalState("convert_to_return_value failed".into()))
                        }
                        None => {
                            Err(Error::IllegalExternalState("convert_to_return_value failed".into()))
                        }
                    };
                }
                if status == Status::InitialReadFailedFinal {
                    return Err(Error::CacheElementFailedLoading);
                }
            }
            let now = self.logger.clock().now_ms();
            if now >= deadline {
                return Err(Error::CacheElementNotYetLoaded);
            }
            entry.wait_for_change(Duration::from_millis((deadline - now).min(50)));
        }
    }

    /// `write(key, Uext) -> () | Error` (spec §4.8).
    pub fn write(&self, key: K, update: Uext) -> Result<()> {
        let entry = self.admit(key.clone())?;

        let converted = guarded_spi_call(
            &self.logger,
            "convert_update_from_external",
            Severity::ExternalDataLoss,
            None,
            || Some(self.collab.adapters.convert_update_from_external(&key, update)),
        );
        let uint = match converted {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                self.logger.log(
                    CacheMessage::ConvertUpdateFromExternalFail,
                    &format!("convert_update_from_external failed: {e}"),
                );
                return Err(Error::IllegalExternalState("update conversion failed".into()));
            }
            None => return Err(Error::IllegalExternalState("update conversion failed".into())),
        };

        let mut g = entry.write();
        match g.status() {
            Status::WriteFailedFinal => Err(Error::CacheElementFailedWrite),
            Status::Ready => {
                let cached = g
                    .payload()
                    .cached
                    .clone()
                    .expect("READY implies a cached value is present");
                let applied = guarded_spi_call(
                    &self.logger,
                    "apply_update",
                    Severity::ExternalDataLoss,
                    None,
                    || Some(self.collab.adapters.apply_update(&key, &uint, cached)),
                );
                match applied {
                    Some(Ok(new_cached)) => {
                        g.set_cached(new_cached);
                        Ok(())
                    }
                    Some(Err(e)) => {
                        self.logger.log(
                            CacheMessage::ApplyUpdateFail,
                            &format!("apply_update failed: {e}"),
                        );
                        Err(Error::IllegalExternalState("apply_update failed".into()))
                    }
                    None => Err(Error::IllegalExternalState("apply_update failed".into())),
                }
            }
            _ => {
                let max = self.config.max_updates_per_element;
                if g.payload().pending_update_count() >= max {
                    self.logger.log(
                        CacheMessage::TooManyCacheElementUpdates,
                        "pending update buffer is at capacity",
                    );
                    return Err(Error::CacheElementHasTooManyUpdates { max });
                }
                g.push_pending_update(uint);
                Ok(())
            }
        }
    }

    /// `preload(key)` (spec §4.8): admit the entry and return, without
    /// waiting for the initial read to complete.
    pub fn preload(&self, key: K) -> Result<()> {
        self.admit(key)?;
        Ok(())
    }

    /// `flush(limitMs)` (spec §4.8): request every dirty entry be written,
    /// blocking up to `limit` for the queues to drain.
    pub fn flush(&self, limit: Duration) -> Result<()> {
        self.control_state.store(ControlState::Flushing as u8, Ordering::Release);
        let deadline = std::time::Instant::now() + limit;
        self.drain_all_with_deadline(deadline);
        if !self.all_queues_idle() {
            self.logger.log(
                CacheMessage::FlushSpooldownNotAchieved,
                "flush did not fully drain within the deadline",
            );
        }
        self.control_state.store(ControlState::Running as u8, Ordering::Release);
        Ok(())
    }

    /// `shutdown(limitMs)` (spec §4.8): orderly stop, draining within
    /// `limit` before joining the worker threads.
    pub fn shutdown(self: Arc<Self>, limit: Duration) {
        self.control_state
            .store(ControlState::ShutdownInProgress as u8, Ordering::Release);
        let deadline = std::time::Instant::now() + limit;
        self.drain_all_with_deadline(deadline);

        if self.all_queues_idle() {
            self.logger.log(CacheMessage::ShutdownCompleted, "clean shutdown, all entries drained");
        } else {
            self.logger.log(
                CacheMessage::ShutdownSpooldownNotAchieved,
                "shutdown deadline elapsed with entries still dirty",
            );
        }

        self.read_queue.shutdown();
        self.write_queue.shutdown();
        self.main_queue.shutdown();
        self.return_queue.shutdown();

        self.control_state.store(ControlState::Shutdown as u8, Ordering::Release);
    }

    fn all_queues_idle(&self) -> bool {
        self.read_queue.stats().queue_depth == 0
            && self.read_queue.stats().active_batches == 0
            && self.write_queue.stats().queue_depth == 0
            && self.write_queue.stats().active_batches == 0
            && self.main_queue.depth() == 0
            && self.return_queue.stats().queue_depth == 0
            && self.return_queue.stats().active_batches == 0
            && self.registry.len() == 0
    }

    fn drain_all_with_deadline(&self, deadline: std::time::Instant) {
        while std::time::Instant::now() < deadline && !self.all_queues_idle() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Point-in-time status snapshot (spec §6).
    pub fn status(&self, max_age_virtual_ms: Option<u64>) -> CacheStatusSnapshot {
        let now = self.logger.clock().now_ms();
        CacheStatusSnapshot {
            control_state: self.control_state(),
            element_count: self.registry.len(),
            read_queue_depth: self.read_queue.stats().queue_depth,
            write_queue_depth: self.write_queue.stats().queue_depth,
            main_queue_depth: self.main_queue.depth(),
            return_queue_depth: self.return_queue.stats().queue_depth,
            reads_processed: self.read_queue.stats().items_processed,
            writes_processed: self.write_queue.stats().items_processed,
            stats: self.logger.status(max_age_virtual_ms.or(Some(now))),
        }
    }
}

/// `MakeMainQueueProcessingDecision` dispatch (spec §4.5): classify the
/// popped entry's current state into a [`MainQueueInput`], ask the policy,
/// and act on the returned [`MainQueueDecision`].
fn main_queue_process<K, V, Uext, Uint, S, C, R>(
    key: K,
    collab: &Collaborators<K, V, Uext, Uint, S, C, R>,
    read_queue: &WorkQueue<ReadJob<K, C, Uint>>,
    write_queue: &Arc<WorkQueue<WriteJob<K, C, Uint>>>,
    main_queue: Option<&Arc<MainQueue<K>>>,
    main_queue_interval_ms: u64,
    max_full_cycles: u32,
) where
    K: Clone + Eq + Hash,
    C: Clone,
{
    let Some(entry) = collab.registry.get(&key) else {
        return;
    };
    let status = entry.read().status();
    let input = match status {
        Status::Ready => MainQueueInput::Ready,
        Status::WritePending | Status::WritePendingResyncPending => MainQueueInput::WritePending,
        Status::WriteFailedFinal => {
            if entry.full_cycle_count.load(Ordering::Acquire) < max_full_cycles {
                MainQueueInput::WriteFailedFinalUnderCycleLimit
            } else {
                MainQueueInput::WriteFailedFinalOverCycleLimit
            }
        }
        // Every other state reached the main queue through a stale hint
        // (spec §5: queues are hints, the entry is authoritative); there's
        // nothing to decide until the in-flight operation completes.
        _ => return,
    };

    let decision = collab.policy.make_main_queue_decision(&key, input);
    let now_plus_interval = || collab.logger.clock().now_ms() + main_queue_interval_ms;

    match decision {
        MainQueueDecision::Write => {
            let mut g = entry.write();
            let snapshot = g
                .payload()
                .cached
                .clone()
                .expect("WRITE decision implies a cached value is present");
            g.begin_write();
            drop(g);
            let _ = write_queue.push(WriteJob {
                key,
                entry,
                snapshot,
                attempt: 0,
            });
        }
        MainQueueDecision::Resync => {
            entry.write().begin_resync();
            let _ = read_queue.push(ReadJob {
                key: key.clone(),
                entry,
                kind: ReadKind::Refresh,
                attempt: 0,
            });
        }
        MainQueueDecision::ExpireFromCache => {
            collab.registry.remove(&key, &entry, &collab.logger);
        }
        MainQueueDecision::RemoveFromCache => {
            if status == Status::WriteFailedFinal {
                collab.logger.log(
                    CacheMessage::WriteFailedFinalDataDiscarded,
                    "full write-retry cycle limit exceeded; entry discarded",
                );
            } else {
                collab
                    .logger
                    .log(CacheMessage::RemoveFromCache, "main queue decided abnormal removal");
            }
            collab.registry.remove(&key, &entry, &collab.logger);
        }
        MainQueueDecision::Requeue => {
            if status == Status::WriteFailedFinal {
                entry.write().requeue_after_write_failure();
            }
            if let Some(main_queue) = main_queue {
                main_queue.push(key, now_plus_interval());
            }
        }
        MainQueueDecision::NonStandard => {
            collab.logger.log(
                CacheMessage::MainQueueNonStandard,
                "main queue decision was non-standard; requeuing as a safe default",
            );
            if let Some(main_queue) = main_queue {
                main_queue.push(key, now_plus_interval());
            }
        }
    }
}
