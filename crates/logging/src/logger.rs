//! The logging core (spec component C1): ties together severity, message
//! classification, throttling, stats and virtual time, and emits to
//! `tracing`.
//!
//! Grounded on the teacher's pattern of wrapping a `tracing` emit behind a
//! crate-local facade that also updates in-process counters — see
//! `background::BackgroundScheduler`'s `catch_unwind`-guarded task execution,
//! which this module's own guard (`Logger::guarded`) mirrors for the
//! logging-about-logging failure case.

use crate::message::{CacheMessage, MessageType};
use crate::severity::Severity;
use crate::stats::{Stats, StatsSnapshot};
use crate::throttle::{MetaEvent, Throttler};
use crate::virtual_time::VirtualClock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

/// The cache's logging core.
///
/// One `Logger` is shared (behind an `Arc`) by every worker and by the
/// public `Cache` handle. All emission goes through [`Logger::log`] or
/// [`Logger::log_non_standard`]; callers never touch `tracing` directly, so
/// throttling and stats accounting cannot be bypassed.
pub struct Logger {
    clock: VirtualClock,
    throttler: Throttler,
    stats: Stats,
    /// Set while a `log` call is itself in the middle of emitting, so that a
    /// panic inside the `tracing` backend (or inside a misbehaving
    /// subscriber) cannot recurse back into this logger and loop forever.
    emitting: AtomicBool,
}

impl Logger {
    /// Build a logger around the given throttling window/limit and time
    /// factor.
    pub fn new(time_factor: f64, throttle_window_ms: u64, throttle_max_per_window: u64) -> Self {
        Logger {
            clock: VirtualClock::new(time_factor),
            throttler: Throttler::new(throttle_window_ms, throttle_max_per_window),
            stats: Stats::new(),
            emitting: AtomicBool::new(false),
        }
    }

    /// The clock backing this logger's timestamps.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Log one of the enumerated cache events, with a human-readable detail
    /// string (e.g. the key, formatted by the caller).
    pub fn log(&self, message: CacheMessage, detail: &str) {
        self.log_inner(MessageType::Standard(message), detail);
    }

    /// Log a non-standard event: a severity plus a free-form classifier used
    /// for throttling, for cases the enumerated `CacheMessage` set doesn't
    /// cover. New call sites should prefer adding a `CacheMessage` variant;
    /// this exists for embedder-supplied diagnostic hooks.
    pub fn log_non_standard(&self, severity: Severity, classifier: &str, detail: &str) {
        self.log_inner(
            MessageType::NonStandard {
                severity,
                classifier: classifier.to_string(),
            },
            detail,
        );
    }

    fn log_inner(&self, msg: MessageType, detail: &str) {
        // Non-recursion guard: if emitting a message itself triggers another
        // log call (a panicking subscriber, a buggy `tracing` layer), drop
        // the nested call rather than recursing.
        if self.emitting.swap(true, Ordering::AcqRel) {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| self.emit(msg, detail)));
        self.emitting.store(false, Ordering::Release);
        if result.is_err() {
            // A panic escaped the emit path. There's nowhere safer to put
            // this than stderr directly: the logger we'd normally use is the
            // thing that just failed.
            eprintln!("wbrb logging: emit panicked for message detail: {detail}");
        }
    }

    fn emit(&self, msg: MessageType, detail: &str) {
        let now_ms = self.clock.now_ms();
        let outcome = self.throttler.check(msg.throttle_key(), msg.throttleable(), now_ms);

        for meta in outcome.meta_events {
            let (meta_msg, text) = match meta {
                MetaEvent::MessagesMaySkip => (
                    CacheMessage::MessagesMaySkip,
                    format!("further messages of this kind may be skipped ({msg})"),
                ),
                MetaEvent::PreviousMessagesSkipped(count) => (
                    CacheMessage::PreviousMessagesSkipped,
                    format!("{count} previous messages of kind {msg} were skipped"),
                ),
            };
            self.record_and_trace(MessageType::Standard(meta_msg), now_ms, &text);
        }

        if outcome.emit {
            self.record_and_trace(msg, now_ms, detail);
        }
    }

    fn record_and_trace(&self, msg: MessageType, now_ms: u64, detail: &str) {
        let severity = msg.severity();
        self.stats.record(severity, now_ms, detail);
        match severity {
            Severity::Trace => tracing::trace!(message = %msg, detail, now_ms),
            Severity::Debug => tracing::debug!(message = %msg, detail, now_ms),
            Severity::ExternalInfo | Severity::Info => {
                tracing::info!(message = %msg, detail, now_ms)
            }
            Severity::ExternalWarn | Severity::InvalidUserInput | Severity::Warn => {
                tracing::warn!(message = %msg, detail, now_ms)
            }
            Severity::ExternalError
            | Severity::SecurityError
            | Severity::Error
            | Severity::ExternalDataLoss
            | Severity::DataLoss
            | Severity::Critical => tracing::error!(message = %msg, detail, now_ms),
        }
    }

    /// Total messages logged at the given severity.
    pub fn count(&self, severity: Severity) -> u64 {
        self.stats.count(severity)
    }

    /// A stats snapshot, reusing the last computed one if it is no older
    /// than `max_age_virtual_ms` rather than recomputing from the live
    /// counters on every call. `None` always recomputes.
    pub fn status(&self, max_age_virtual_ms: Option<u64>) -> StatsSnapshot {
        self.stats.snapshot(self.clock.now_ms(), max_age_virtual_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_increments_stats() {
        let logger = Logger::new(1.0, 1_000, 100);
        logger.log(CacheMessage::ResyncIsTooLate, "key=42");
        assert_eq!(logger.count(Severity::ExternalDataLoss), 1);
    }

    #[test]
    fn throttled_messages_still_emit_meta_event() {
        let logger = Logger::new(1.0, 1_000, 1);
        logger.clock().freeze_at(0);
        logger.log(CacheMessage::ResyncIsTooLate, "a");
        logger.log(CacheMessage::ResyncIsTooLate, "b");
        assert_eq!(logger.count(Severity::ExternalDataLoss), 1);
        assert_eq!(logger.count(Severity::Info), 1); // MessagesMaySkip
    }

    #[test]
    fn non_standard_message_uses_given_severity() {
        let logger = Logger::new(1.0, 1_000, 100);
        logger.log_non_standard(Severity::SecurityError, "auth.rejected", "bad token");
        assert_eq!(logger.count(Severity::SecurityError), 1);
    }

    #[test]
    fn status_reflects_recorded_messages() {
        let logger = Logger::new(1.0, 1_000, 100);
        logger.clock().freeze_at(500);
        logger.log(CacheMessage::ShutdownCompleted, "done");
        let snap = logger.status(None);
        let entry = snap.for_severity(Severity::Info);
        assert_eq!(entry.count, 1);
        assert_eq!(entry.last_message.as_ref().unwrap().at_ms, 500);
    }

    #[test]
    fn status_reuses_snapshot_within_max_age() {
        let logger = Logger::new(1.0, 1_000, 100);
        logger.clock().freeze_at(0);
        logger.log(CacheMessage::ShutdownCompleted, "first");
        let first = logger.status(Some(1_000));

        logger.clock().freeze_at(100);
        logger.log(CacheMessage::ShutdownCompleted, "second");
        let reused = logger.status(Some(1_000));
        assert_eq!(reused, first);

        logger.clock().freeze_at(2_000);
        let fresh = logger.status(Some(1_000));
        assert_eq!(fresh.for_severity(Severity::Info).count, 2);
    }
}
