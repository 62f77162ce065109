//! SPI policy hooks (component C9, spec §4.9).
//!
//! The source models these as protected overridable methods on a large base
//! class; the idiomatic translation is a capability trait passed to the
//! cache at construction, with a spec-compliant default implementation. Every
//! call site goes through [`guarded_spi_call`], which catches a panicking or
//! invalid hook and substitutes the documented safe default — grounded on
//! the teacher's `catch_unwind`-wrapped task execution in
//! `background::worker_loop` / `ActiveTaskGuard`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use wbrb_logging::{CacheMessage, Logger, Severity};

/// Outcome of `MakeReadRetryDecision` / the write-retry decision (spec
/// §4.4/§4.6): whether a failed storage operation should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enter the queue and try again.
    Retry,
    /// Give up; drive the entry to its terminal-failure state.
    FinalFail,
}

/// Outcome of the merge-impossible decision taken when a resync's result
/// cannot be merged with collected updates (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Discard the pending updates and keep serving the previous value.
    DiscardUpdates,
}

/// Outcome of `MakeMainQueueProcessingDecision` (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainQueueDecision {
    /// Hand a snapshot to the write queue.
    Write,
    /// Place onto the read queue as a refresh read.
    Resync,
    /// Normal expiration; no data loss.
    ExpireFromCache,
    /// Abnormal removal.
    RemoveFromCache,
    /// Extend the deadline and re-enter the main queue.
    Requeue,
    /// Non-standard outcome; emits EXTERNAL_WARN.
    NonStandard,
}

/// Outcome of `MakeReturnQueueProcessingDecision` (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnQueueDecision {
    /// Abnormal no-op; left on the queue.
    DoNothing,
    /// Normal expiration.
    Expire,
    /// Removal, typically following a terminal write failure.
    Remove,
    /// Re-enter the return queue for another dwell period.
    RequeueToReturnQueue,
    /// Non-standard outcome.
    NonStandard,
}

/// The cache's SPI: every policy decision point named in spec.md §4.2–§4.7.
///
/// Implementors needn't be `Send + Sync` by convention alone — the cache
/// requires it, since the same `Policy` is shared across the four worker
/// threads.
pub trait Policy<K>: Send + Sync {
    /// `MakeReadRetryDecision(error, key, attempt)` for both the initial read
    /// and resync reads.
    fn make_read_retry_decision(&self, key: &K, attempt: u32, error: &str) -> RetryDecision;

    /// The write-retry decision (spec §4.6).
    fn make_write_retry_decision(&self, key: &K, attempt: u32, error: &str) -> RetryDecision;

    /// The merge-impossible decision (spec §4.2's "Read merge into collected
    /// updates" edge policy).
    fn make_merge_impossible_decision(&self, key: &K) -> MergeDecision {
        let _ = key;
        MergeDecision::DiscardUpdates
    }

    /// `MakeMainQueueProcessingDecision` (spec §4.5).
    fn make_main_queue_decision(
        &self,
        key: &K,
        status: crate::MainQueueInput,
    ) -> MainQueueDecision;

    /// `MakeReturnQueueProcessingDecision` (spec §4.7).
    fn make_return_queue_decision(&self, key: &K, write_succeeded: bool) -> ReturnQueueDecision {
        let _ = key;
        if write_succeeded {
            ReturnQueueDecision::Expire
        } else {
            ReturnQueueDecision::Remove
        }
    }

    /// `isResetFailureCounts` (spec §4.5): whether a successful cycle resets
    /// the consecutive-failure counters. Defaults to `true`.
    fn is_reset_failure_counts(&self, key: &K) -> bool {
        let _ = key;
        true
    }
}

/// Spec-compliant default policy (spec §4.5's documented default path):
/// `READY -> WRITE` on main-queue expiry, retry up to the configured limits,
/// `WRITE_PENDING` at expiry is requeued with a warning.
pub struct DefaultPolicy {
    read_retry_limit: u32,
    write_retry_limit: u32,
}

impl DefaultPolicy {
    /// Build a default policy bound to the given retry limits (normally
    /// taken from `Config`).
    pub fn new(read_retry_limit: u32, write_retry_limit: u32) -> Self {
        DefaultPolicy {
            read_retry_limit,
            write_retry_limit,
        }
    }
}

impl<K> Policy<K> for DefaultPolicy {
    fn make_read_retry_decision(&self, _key: &K, attempt: u32, _error: &str) -> RetryDecision {
        if attempt < self.read_retry_limit {
            RetryDecision::Retry
        } else {
            RetryDecision::FinalFail
        }
    }

    fn make_write_retry_decision(&self, _key: &K, attempt: u32, _error: &str) -> RetryDecision {
        if attempt < self.write_retry_limit {
            RetryDecision::Retry
        } else {
            RetryDecision::FinalFail
        }
    }

    fn make_main_queue_decision(&self, _key: &K, input: crate::MainQueueInput) -> MainQueueDecision {
        use crate::MainQueueInput::*;
        match input {
            Ready => MainQueueDecision::Write,
            WritePending => MainQueueDecision::Requeue,
            WriteFailedFinalUnderCycleLimit => MainQueueDecision::Requeue,
            WriteFailedFinalOverCycleLimit => MainQueueDecision::RemoveFromCache,
        }
    }
}

/// Call an SPI hook, catching a panic and substituting `default` while
/// logging `SPI_EXCEPTION_DATA_LOSS` (or `SPI_EXCEPTION_ERROR` for
/// non-data-loss hooks, selected via `severity`).
pub fn guarded_spi_call<R>(
    logger: &Logger,
    hook_name: &str,
    severity: Severity,
    default: R,
    call: impl FnOnce() -> R,
) -> R {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => value,
        Err(_) => {
            let message = if severity.is_data_loss() {
                CacheMessage::SpiExceptionDataLoss
            } else {
                CacheMessage::SpiExceptionError
            };
            logger.log(message, &format!("SPI hook '{hook_name}' panicked; using safe default"));
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_until_limit() {
        let p = DefaultPolicy::new(2, 2);
        assert_eq!(p.make_read_retry_decision(&1u32, 0, "x"), RetryDecision::Retry);
        assert_eq!(p.make_read_retry_decision(&1u32, 1, "x"), RetryDecision::Retry);
        assert_eq!(p.make_read_retry_decision(&1u32, 2, "x"), RetryDecision::FinalFail);
    }

    #[test]
    fn default_main_queue_decision_ready_is_write() {
        let p = DefaultPolicy::new(2, 2);
        assert_eq!(
            p.make_main_queue_decision(&1u32, crate::MainQueueInput::Ready),
            MainQueueDecision::Write
        );
    }

    #[test]
    fn guarded_spi_call_recovers_from_panic() {
        let logger = Logger::new(1.0, 1_000, 100);
        let result = guarded_spi_call(&logger, "test_hook", Severity::ExternalDataLoss, 42, || {
            panic!("boom")
        });
        assert_eq!(result, 42);
        assert_eq!(logger.count(Severity::ExternalDataLoss), 1);
    }

    #[test]
    fn guarded_spi_call_passes_through_normal_result() {
        let logger = Logger::new(1.0, 1_000, 100);
        let result = guarded_spi_call(&logger, "test_hook", Severity::Error, 0, || 7);
        assert_eq!(result, 7);
        assert_eq!(logger.count(Severity::Error), 0);
    }
}
