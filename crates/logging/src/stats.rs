//! Monitoring stats: per-severity counters plus the last timestamp/text seen
//! at each severity (spec §4.1: "the cache must expose, for each severity, a
//! count of messages logged and the most recent message text/time"). The
//! spec explicitly allows the count and the last-message pair to be updated
//! non-atomically with respect to each other, so each severity gets its own
//! independent counter and its own independently-locked last-message slot.

use crate::severity::Severity;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

struct LastMessage {
    at_ms: u64,
    text: String,
}

/// Per-severity counters and last-message tracking.
///
/// One array slot per [`Severity::ALL`] entry, indexed by
/// [`Severity::severity_index`].
pub struct Stats {
    counts: [AtomicU64; Severity::ALL.len()],
    last: [Mutex<Option<LastMessage>>; Severity::ALL.len()],
    /// Last computed snapshot plus the virtual-ms timestamp it was computed
    /// at, reused by `snapshot()` within `maxAgeVirtualMs` (spec §4.1:
    /// "snapshots are cached and reused within maxAgeVirtualMs").
    cached: Mutex<Option<(u64, StatsSnapshot)>>,
}

impl Stats {
    /// A fresh stats block with all counters at zero.
    pub fn new() -> Self {
        Stats {
            counts: Default::default(),
            last: Default::default(),
            cached: Mutex::new(None),
        }
    }

    /// Record one message of the given severity, with its rendered text and
    /// the virtual-ms timestamp it was logged at.
    pub fn record(&self, severity: Severity, at_ms: u64, text: impl Into<String>) {
        let idx = severity.severity_index() as usize;
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        *self.last[idx].lock() = Some(LastMessage {
            at_ms,
            text: text.into(),
        });
    }

    /// Total messages logged at the given severity since this `Stats` was
    /// created.
    pub fn count(&self, severity: Severity) -> u64 {
        self.counts[severity.severity_index() as usize].load(Ordering::Relaxed)
    }

    /// A point-in-time snapshot of every severity's counters and last
    /// message, for `Cache::status()`.
    ///
    /// `max_age_virtual_ms`, if given, reuses the last computed snapshot as
    /// long as it is no older than that many virtual ms relative to
    /// `now_ms`, instead of recomputing from the live atomics on every call.
    /// `None` always recomputes.
    pub fn snapshot(&self, now_ms: u64, max_age_virtual_ms: Option<u64>) -> StatsSnapshot {
        let Some(max_age) = max_age_virtual_ms else {
            return self.compute_snapshot();
        };

        let mut cached = self.cached.lock();
        if let Some((cached_at, snap)) = cached.as_ref() {
            if now_ms.saturating_sub(*cached_at) <= max_age {
                return snap.clone();
            }
        }
        let snap = self.compute_snapshot();
        *cached = Some((now_ms, snap.clone()));
        snap
    }

    fn compute_snapshot(&self) -> StatsSnapshot {
        let mut per_severity = Vec::with_capacity(Severity::ALL.len());
        for severity in Severity::ALL {
            let idx = severity.severity_index() as usize;
            let count = self.counts[idx].load(Ordering::Relaxed);
            let last = self.last[idx].lock();
            let last_message = last.as_ref().map(|m| LastMessageSnapshot {
                at_ms: m.at_ms,
                text: m.text.clone(),
            });
            per_severity.push(SeverityStats {
                severity,
                count,
                last_message,
            });
        }
        StatsSnapshot { per_severity }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new()
    }
}

/// Last-message text and timestamp, detached from the live `Stats` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessageSnapshot {
    /// Virtual ms timestamp this message was logged at.
    pub at_ms: u64,
    /// The rendered message text.
    pub text: String,
}

/// One severity's counters at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityStats {
    /// Which severity this entry describes.
    pub severity: Severity,
    /// Total messages logged at this severity.
    pub count: u64,
    /// The most recent message at this severity, if any and not stale.
    pub last_message: Option<LastMessageSnapshot>,
}

/// A full point-in-time stats snapshot, one entry per severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Entries in [`Severity::ALL`] order.
    pub per_severity: Vec<SeverityStats>,
}

impl StatsSnapshot {
    /// The entry for a specific severity.
    pub fn for_severity(&self, severity: Severity) -> &SeverityStats {
        &self.per_severity[severity.severity_index() as usize]
    }

    /// Total messages logged at ERROR or above, across every such severity.
    pub fn total_errors_or_above(&self) -> u64 {
        self.per_severity
            .iter()
            .filter(|s| s.severity.is_error_or_higher())
            .map(|s| s.count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_increment_count_and_last_message() {
        let stats = Stats::new();
        stats.record(Severity::Warn, 100, "first");
        stats.record(Severity::Warn, 200, "second");
        assert_eq!(stats.count(Severity::Warn), 2);
        let snap = stats.snapshot(200, None);
        let entry = snap.for_severity(Severity::Warn);
        assert_eq!(entry.count, 2);
        assert_eq!(entry.last_message.as_ref().unwrap().text, "second");
    }

    #[test]
    fn untouched_severities_report_zero_and_no_last_message() {
        let stats = Stats::new();
        let snap = stats.snapshot(0, None);
        let entry = snap.for_severity(Severity::Critical);
        assert_eq!(entry.count, 0);
        assert!(entry.last_message.is_none());
    }

    #[test]
    fn snapshot_is_reused_within_max_age() {
        let stats = Stats::new();
        stats.record(Severity::Error, 0, "first");
        let first = stats.snapshot(0, Some(100));

        stats.record(Severity::Error, 50, "second");
        let reused = stats.snapshot(50, Some(100));
        assert_eq!(
            reused, first,
            "a snapshot within max_age_virtual_ms must be reused, not recomputed"
        );
    }

    #[test]
    fn snapshot_recomputes_once_max_age_elapses() {
        let stats = Stats::new();
        stats.record(Severity::Error, 0, "first");
        let first = stats.snapshot(0, Some(100));

        stats.record(Severity::Error, 200, "second");
        let fresh = stats.snapshot(200, Some(100));
        assert_ne!(fresh, first);
        let entry = fresh.for_severity(Severity::Error);
        assert_eq!(entry.count, 2);
        assert_eq!(entry.last_message.as_ref().unwrap().text, "second");
    }

    #[test]
    fn snapshot_without_max_age_always_recomputes() {
        let stats = Stats::new();
        stats.record(Severity::Error, 0, "first");
        let _ = stats.snapshot(0, None);
        stats.record(Severity::Error, 1, "second");
        let snap = stats.snapshot(1, None);
        assert_eq!(snap.for_severity(Severity::Error).count, 2);
    }

    #[test]
    fn total_errors_or_above_sums_only_qualifying_severities() {
        let stats = Stats::new();
        stats.record(Severity::Warn, 0, "w");
        stats.record(Severity::Error, 0, "e");
        stats.record(Severity::Critical, 0, "c");
        let snap = stats.snapshot(0, None);
        assert_eq!(snap.total_errors_or_above(), 2);
    }
}
