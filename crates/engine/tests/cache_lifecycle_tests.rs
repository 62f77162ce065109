//! Integration tests for the embedder-facing `Cache` API, driven through a
//! fault-injecting in-memory `Storage` double: happy-path load, read
//! timeout, write-retry exhaustion, resync-too-late, shutdown drain, and SPI
//! exception throttling.
//!
//! The domain under test is a trivial running-total counter: storage and the
//! cache both hold an `i64`, updates are signed deltas.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wbrb_core::{AdapterError, Adapters, Config, Error, IntervalMs, Storage, StorageError};
use wbrb_engine::{Cache, MainQueueDecision, MainQueueInput, Policy, RetryDecision};
use wbrb_logging::Severity as EngineSeverity;

/// In-memory backing store that can be told to fail the next N reads or
/// writes for a key, or to delay every read by a fixed amount.
#[derive(Default)]
struct FlakyStorage {
    data: Mutex<HashMap<String, i64>>,
    fail_reads: Mutex<HashMap<String, usize>>,
    fail_writes: Mutex<HashMap<String, usize>>,
    read_delay: Mutex<Option<Duration>>,
}

impl FlakyStorage {
    fn seed(&self, key: &str, value: i64) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }

    fn fail_writes_for(&self, key: &str, n: usize) {
        self.fail_writes.lock().unwrap().insert(key.to_string(), n);
    }

    fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }
}

impl Storage<String, i64> for FlakyStorage {
    type Error = StorageError;

    fn read(&self, key: &String) -> Result<i64, StorageError> {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut fails = self.fail_reads.lock().unwrap();
        if let Some(count) = fails.get_mut(key) {
            if *count > 0 {
                *count -= 1;
                return Err(StorageError::new("simulated read failure"));
            }
        }
        Ok(*self.data.lock().unwrap().get(key).unwrap_or(&0))
    }

    fn write(&self, key: &String, value: i64) -> Result<(), StorageError> {
        let mut fails = self.fail_writes.lock().unwrap();
        if let Some(count) = fails.get_mut(key) {
            if *count > 0 {
                *count -= 1;
                return Err(StorageError::new("simulated write failure"));
            }
        }
        self.data.lock().unwrap().insert(key.clone(), value);
        Ok(())
    }
}

/// Adapters for the counter domain, with two knobs integration tests flip to
/// force the edge cases a well-behaved embedder wouldn't normally hit: a
/// merge that always fails (resync-too-late) and a conversion that always
/// panics (SPI exception throttling).
#[derive(Default)]
struct CounterAdapters {
    fail_merge: Arc<AtomicBool>,
    panic_on_convert: Arc<AtomicBool>,
}

impl Adapters<String, (), i64, i64, i64, i64, i64> for CounterAdapters {
    fn convert_update_from_external(&self, _key: &String, update: i64) -> Result<i64, AdapterError> {
        Ok(update)
    }

    fn convert_from_storage(&self, _key: &String, data: i64) -> Result<i64, AdapterError> {
        Ok(data)
    }

    fn convert_to_return_value(&self, _key: &String, cached: &i64) -> Result<i64, AdapterError> {
        if self.panic_on_convert.load(Ordering::Acquire) {
            panic!("simulated adapter panic");
        }
        Ok(*cached)
    }

    fn merge(
        &self,
        _key: &String,
        _cached: Option<&i64>,
        storage: i64,
        pending: &[i64],
    ) -> Result<i64, AdapterError> {
        if self.fail_merge.load(Ordering::Acquire) {
            return Err(AdapterError::new("simulated merge failure"));
        }
        Ok(storage + pending.iter().sum::<i64>())
    }

    fn apply_update(&self, _key: &String, update: &i64, cached: i64) -> Result<i64, AdapterError> {
        Ok(cached + update)
    }

    fn split_for_write(&self, _key: &String, cached: i64) -> Result<(i64, i64), AdapterError> {
        Ok((cached, cached))
    }
}

/// A policy that always resyncs a `READY` entry instead of writing it,
/// keeping every other decision at the spec-default behaviour. Used to
/// exercise the resync path deterministically without depending on pending
/// writes to steer the main queue's choice.
struct AlwaysResyncPolicy {
    read_retry_limit: u32,
    write_retry_limit: u32,
}

impl Policy<String> for AlwaysResyncPolicy {
    fn make_read_retry_decision(&self, _key: &String, attempt: u32, _error: &str) -> RetryDecision {
        if attempt < self.read_retry_limit {
            RetryDecision::Retry
        } else {
            RetryDecision::FinalFail
        }
    }

    fn make_write_retry_decision(&self, _key: &String, attempt: u32, _error: &str) -> RetryDecision {
        if attempt < self.write_retry_limit {
            RetryDecision::Retry
        } else {
            RetryDecision::FinalFail
        }
    }

    fn make_main_queue_decision(&self, _key: &String, input: MainQueueInput) -> MainQueueDecision {
        match input {
            MainQueueInput::Ready => MainQueueDecision::Resync,
            MainQueueInput::WritePending => MainQueueDecision::Requeue,
            MainQueueInput::WriteFailedFinalUnderCycleLimit => MainQueueDecision::Requeue,
            MainQueueInput::WriteFailedFinalOverCycleLimit => MainQueueDecision::RemoveFromCache,
        }
    }
}

type CounterCache = Cache<String, (), i64, i64, i64, i64, i64>;

fn new_cache(storage: Arc<FlakyStorage>) -> Arc<CounterCache> {
    new_cache_with(Config::with_small_limits(), storage, CounterAdapters::default())
}

fn new_cache_with(
    config: Config,
    storage: Arc<FlakyStorage>,
    adapters: CounterAdapters,
) -> Arc<CounterCache> {
    let storage: Arc<dyn Storage<String, i64, Error = StorageError>> = storage;
    let adapters: Arc<dyn Adapters<String, (), i64, i64, i64, i64, i64>> = Arc::new(adapters);
    Cache::with_default_policy(config, storage, adapters).expect("cache construction")
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= deadline {
            return cond();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn happy_path_read_after_initial_load() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k1", 42);
    let cache = new_cache(storage);

    assert_eq!(cache.read("k1".to_string()).unwrap(), 42);
}

#[test]
fn read_times_out_while_initial_load_is_slow() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k2", 1);
    storage.set_read_delay(Duration::from_secs(5));
    let cache = new_cache(storage);

    let err = cache.read("k2".to_string()).unwrap_err();
    assert!(matches!(err, Error::CacheElementNotYetLoaded));
}

#[test]
fn write_retries_exhaust_and_entry_is_evicted_with_update_discarded() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k3", 7);
    storage.fail_writes_for("k3", 1_000);
    let cache = new_cache(storage);

    assert_eq!(cache.read("k3".to_string()).unwrap(), 7);
    cache.write("k3".to_string(), 5).unwrap();

    let evicted = wait_until(Duration::from_secs(5), || cache.status(None).element_count == 0);
    assert!(
        evicted,
        "entry should be evicted once the full-cycle write-failure limit is exceeded"
    );

    // The discarded update never reached storage: a fresh read re-admits the
    // entry and sees the original seeded value.
    assert_eq!(cache.read("k3".to_string()).unwrap(), 7);
}

#[test]
fn resync_merge_failure_discards_updates_but_keeps_serving_last_value() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k4", 10);
    let fail_merge = Arc::new(AtomicBool::new(false));
    let adapters = CounterAdapters {
        fail_merge: fail_merge.clone(),
        panic_on_convert: Arc::new(AtomicBool::new(false)),
    };
    let mut config = Config::with_small_limits();
    config.main_queue_cache_time_ms = IntervalMs::from_millis(100);

    let storage_dyn: Arc<dyn Storage<String, i64, Error = StorageError>> = storage.clone();
    let adapters_dyn: Arc<dyn Adapters<String, (), i64, i64, i64, i64, i64>> = Arc::new(adapters);
    let policy = Arc::new(AlwaysResyncPolicy {
        read_retry_limit: config.read_retry_limit,
        write_retry_limit: config.write_retry_limit,
    });
    let cache: Arc<CounterCache> =
        Cache::new(config, storage_dyn, adapters_dyn, policy).expect("cache construction");

    assert_eq!(cache.read("k4".to_string()).unwrap(), 10);

    // Slow down reads so the refresh read the main queue is about to
    // dispatch stays in flight long enough for a concurrent write to land
    // while the entry is READY_RESYNC_PENDING, giving it a pending update to
    // merge (or, here, fail to merge).
    storage.set_read_delay(Duration::from_millis(300));
    fail_merge.store(true, Ordering::Release);

    // Give the main queue time to observe READY and dispatch the resync.
    std::thread::sleep(Duration::from_millis(150));
    cache.write("k4".to_string(), 3).unwrap();

    // Wait out the resync read plus a margin for the merge failure to land.
    std::thread::sleep(Duration::from_millis(400));

    assert_eq!(
        cache.read("k4".to_string()).unwrap(),
        10,
        "a failed merge must discard the pending update, not corrupt the cached value"
    );

    let snapshot = cache.status(None);
    let entry = snapshot.stats.for_severity(EngineSeverity::ExternalDataLoss);
    assert!(entry.count >= 1, "resync-too-late must be logged as a data-loss event");
}

#[test]
fn shutdown_drains_and_marks_cache_unusable() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k6", 1);
    let cache = new_cache(storage);

    cache.read("k6".to_string()).unwrap();
    cache.write("k6".to_string(), 1).unwrap();

    cache.clone().shutdown(Duration::from_secs(2));

    assert!(!cache.is_alive());
    assert!(!cache.is_usable());

    let err = cache.write("k6".to_string(), 1).unwrap_err();
    assert!(matches!(err, Error::IllegalCacheState(_)));
}

#[test]
fn repeated_spi_panics_are_throttled_by_the_logging_core() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k7", 1);
    let panic_on_convert = Arc::new(AtomicBool::new(false));
    let adapters = CounterAdapters {
        fail_merge: Arc::new(AtomicBool::new(false)),
        panic_on_convert: panic_on_convert.clone(),
    };
    let mut config = Config::with_small_limits();
    config.log_throttle_time_interval = IntervalMs::from_millis(10_000);
    config.log_throttle_max_messages_of_type_per_time_interval = 2;
    let cache = new_cache_with(config, storage, adapters);

    assert_eq!(cache.read("k7".to_string()).unwrap(), 1);

    panic_on_convert.store(true, Ordering::Release);
    for _ in 0..10 {
        let _ = cache.read("k7".to_string());
    }

    let snapshot = cache.status(None);
    let entry = snapshot.stats.for_severity(EngineSeverity::ExternalDataLoss);
    assert!(entry.count >= 1);
    assert!(
        entry.count < 10,
        "the throttle window should suppress most of the ten identical panics, got {}",
        entry.count
    );
}

#[test]
fn reads_still_succeed_when_a_worker_pool_is_configured() {
    let storage = Arc::new(FlakyStorage::default());
    storage.seed("k8", 99);
    let mut config = Config::with_small_limits();
    config.read_worker_pool_size = 2;
    config.write_worker_pool_size = 2;
    let cache = new_cache_with(config, storage, CounterAdapters::default());

    assert_eq!(cache.read("k8".to_string()).unwrap(), 99);
    cache.write("k8".to_string(), 1).unwrap();
    assert_eq!(cache.read("k8".to_string()).unwrap(), 100);
}
