//! Cache configuration.
//!
//! `Config` is the fully-constructed value the cache consumes (spec §1:
//! "configuration loading... is out of scope — the cache consumes a
//! fully-constructed `Config` value"). This module only models the value and
//! its validation, not a file/env loader.
//!
//! Defaults pair a production-sane [`Config::default`] with a
//! [`Config::with_small_limits`] constructor for fast, deterministic tests —
//! the same two-constructor shape the teacher uses for `Limits`.

use crate::interval::IntervalMs;
use thiserror::Error;

/// Fully-resolved cache configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix applied to this cache instance's worker thread names and log
    /// classifiers, so multiple caches in one process are distinguishable.
    pub common_naming_prefix: String,

    /// Sliding window length for message throttling (C1).
    pub log_throttle_time_interval: IntervalMs,
    /// Max messages of a given type emitted per throttle window; `0` disables
    /// throttling entirely (every message is emitted).
    pub log_throttle_max_messages_of_type_per_time_interval: u64,

    /// Deadline (from becoming READY) after which an entry is placed back on
    /// the main queue for a lifecycle decision.
    pub main_queue_cache_time_ms: IntervalMs,
    /// Minimum dwell time on the return queue after a write completes.
    pub return_queue_cache_time_min_ms: IntervalMs,
    /// Target size used by the main queue processor as a backpressure signal.
    pub main_queue_max_target_size: usize,
    /// Hard limit on total cache elements; admission beyond this fails.
    pub max_cache_elements_hard_limit: usize,
    /// Max buffered `Uint` updates per entry before `write()` is refused.
    pub max_updates_per_element: usize,

    /// Max consecutive read failures (initial or resync) before final failure.
    pub read_retry_limit: u32,
    /// Max consecutive write failures before final failure.
    pub write_retry_limit: u32,
    /// Max full resync→write cycles without a successful write before the
    /// entry is force-discarded.
    pub max_full_cycles_without_write_success: u32,

    /// Batching delay for the read queue processor.
    pub read_batch_delay_ms: IntervalMs,
    /// Batching delay for the write queue processor.
    pub write_batch_delay_ms: IntervalMs,

    /// Number of worker threads used to parallelise storage reads; `0` means
    /// reads are dispatched inline on the read queue's own worker thread.
    pub read_worker_pool_size: usize,
    /// Number of worker threads used to parallelise storage writes; `0` means
    /// writes are dispatched inline on the write queue's own worker thread.
    pub write_worker_pool_size: usize,

    /// Default timeout for a blocking `read()` call when the entry has not
    /// yet reached a readable state.
    pub read_timeout_ms: IntervalMs,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            common_naming_prefix: "wbrb".to_string(),
            log_throttle_time_interval: IntervalMs::from_millis(10_000),
            log_throttle_max_messages_of_type_per_time_interval: 100,
            main_queue_cache_time_ms: IntervalMs::from_millis(60_000),
            return_queue_cache_time_min_ms: IntervalMs::from_millis(1_000),
            main_queue_max_target_size: 10_000,
            max_cache_elements_hard_limit: 1_000_000,
            max_updates_per_element: 10_000,
            read_retry_limit: 3,
            write_retry_limit: 3,
            max_full_cycles_without_write_success: 5,
            read_batch_delay_ms: IntervalMs::from_millis(10),
            write_batch_delay_ms: IntervalMs::from_millis(10),
            read_worker_pool_size: 0,
            write_worker_pool_size: 0,
            read_timeout_ms: IntervalMs::from_millis(5_000),
        }
    }
}

impl Config {
    /// Small, fast-to-hit limits for unit/integration tests.
    ///
    /// Mirrors the teacher's `Limits::with_small_limits()`: a second named
    /// constructor rather than a mutable "test mode" flag on the production
    /// default.
    pub fn with_small_limits() -> Self {
        Config {
            main_queue_cache_time_ms: IntervalMs::from_millis(100),
            return_queue_cache_time_min_ms: IntervalMs::from_millis(50),
            main_queue_max_target_size: 100,
            max_cache_elements_hard_limit: 1_000,
            max_updates_per_element: 20,
            read_retry_limit: 2,
            write_retry_limit: 2,
            max_full_cycles_without_write_success: 3,
            read_batch_delay_ms: IntervalMs::from_millis(1),
            write_batch_delay_ms: IntervalMs::from_millis(1),
            read_timeout_ms: IntervalMs::from_millis(200),
            ..Config::default()
        }
    }

    /// Validate the configuration, returning every violation rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.main_queue_cache_time_ms.as_millis() == 0 {
            problems.push("mainQueueCacheTimeMs must be positive");
        }
        if self.main_queue_max_target_size == 0 {
            problems.push("mainQueueMaxTargetSize must be positive");
        }
        if self.max_cache_elements_hard_limit == 0 {
            problems.push("maxCacheElementsHardLimit must be positive");
        }
        if self.max_updates_per_element == 0 {
            problems.push("maxUpdatesPerElement must be positive");
        }
        if self.log_throttle_time_interval.as_millis() == 0 {
            problems.push("logThrottleTimeInterval must be positive");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

/// Configuration validation failure.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// One or more fields failed validation; the message concatenates all
    /// violations found.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn small_limits_config_validates() {
        Config::with_small_limits().validate().unwrap();
    }

    #[test]
    fn zero_main_queue_target_size_is_rejected() {
        let mut c = Config::default();
        c.main_queue_max_target_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_updates_per_element_is_rejected() {
        let mut c = Config::default();
        c.max_updates_per_element = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_log_throttle_time_interval_is_rejected() {
        let mut c = Config::default();
        c.log_throttle_time_interval = IntervalMs::from_millis(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn multiple_violations_are_all_reported() {
        let mut c = Config::default();
        c.main_queue_max_target_size = 0;
        c.max_updates_per_element = 0;
        let err = c.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mainQueueMaxTargetSize"));
        assert!(msg.contains("maxUpdatesPerElement"));
    }
}
