//! Message throttling (spec §4.1, invariants 4 & 5 in §8).
//!
//! Per `(ordinal | classifier)` key, at most `N` messages may be emitted
//! within a window of `T` milliseconds; once per window the `N+1`-th attempt
//! triggers a "messages may be skipped" meta-event, and on window rollover a
//! "previous messages skipped: count" meta-event reports how many were
//! dropped. The meta-events are themselves `throttleable = false` and must
//! never recurse into this same accounting (spec: "infinite-loop guard is a
//! hard invariant").

use crate::message::ThrottleKey;
use dashmap::DashMap;
use parking_lot::Mutex;

/// What the caller should do after consulting the throttler for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleOutcome {
    /// Whether the original message should be emitted.
    pub emit: bool,
    /// Meta-events to emit alongside (or instead of) the original message,
    /// in order. These must be logged with `throttleable = false`.
    pub meta_events: Vec<MetaEvent>,
}

/// A throttling meta-event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEvent {
    /// Emitted exactly once per window, the first time the limit is exceeded.
    MessagesMaySkip,
    /// Emitted on window rollover, reporting how many messages were skipped
    /// in the window that just ended.
    PreviousMessagesSkipped(u64),
}

struct WindowState {
    window_start_ms: u64,
    emitted_in_window: u64,
    skipped_in_window: u64,
    may_skip_emitted: bool,
}

/// Sliding-window throttler, one independent window per throttle key.
pub struct Throttler {
    windows: DashMap<ThrottleKey, Mutex<WindowState>>,
    window_ms: u64,
    max_per_window: u64,
}

impl Throttler {
    /// Construct a throttler with the given window length and per-window
    /// limit. `max_per_window == 0` disables throttling: every message is
    /// always emitted (spec §6: "0 disables").
    pub fn new(window_ms: u64, max_per_window: u64) -> Self {
        Throttler {
            windows: DashMap::new(),
            window_ms,
            max_per_window,
        }
    }

    /// Consult the throttler for a message of the given key.
    ///
    /// `throttleable = false` bypasses all accounting and always emits with
    /// no meta-events — this is the hard non-recursion guard for the
    /// meta-events themselves.
    pub fn check(&self, key: ThrottleKey, throttleable: bool, now_ms: u64) -> ThrottleOutcome {
        if !throttleable || self.max_per_window == 0 {
            return ThrottleOutcome {
                emit: true,
                meta_events: Vec::new(),
            };
        }

        let entry = self.windows.entry(key).or_insert_with(|| {
            Mutex::new(WindowState {
                window_start_ms: now_ms,
                emitted_in_window: 0,
                skipped_in_window: 0,
                may_skip_emitted: false,
            })
        });
        let mut state = entry.lock();

        let mut meta_events = Vec::new();
        if now_ms.saturating_sub(state.window_start_ms) >= self.window_ms {
            if state.skipped_in_window > 0 {
                meta_events.push(MetaEvent::PreviousMessagesSkipped(state.skipped_in_window));
            }
            state.window_start_ms = now_ms;
            state.emitted_in_window = 0;
            state.skipped_in_window = 0;
            state.may_skip_emitted = false;
        }

        if state.emitted_in_window < self.max_per_window {
            state.emitted_in_window += 1;
            ThrottleOutcome {
                emit: true,
                meta_events,
            }
        } else {
            state.skipped_in_window += 1;
            if !state.may_skip_emitted {
                state.may_skip_emitted = true;
                meta_events.push(MetaEvent::MessagesMaySkip);
            }
            ThrottleOutcome {
                emit: false,
                meta_events,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CacheMessage;

    fn key() -> ThrottleKey {
        ThrottleKey::Ordinal(CacheMessage::ResyncIsTooLate)
    }

    #[test]
    fn first_n_messages_emit_without_meta() {
        let t = Throttler::new(1_000, 3);
        for _ in 0..3 {
            let o = t.check(key(), true, 0);
            assert!(o.emit);
            assert!(o.meta_events.is_empty());
        }
    }

    #[test]
    fn scenario_6_from_spec() {
        // window=1000ms, max=3, 10 identical ERRORs within 200ms.
        let t = Throttler::new(1_000, 3);
        let mut emitted = 0;
        let mut may_skip_count = 0;
        for i in 0..10 {
            let o = t.check(key(), true, i * 20);
            if o.emit {
                emitted += 1;
            }
            may_skip_count += o
                .meta_events
                .iter()
                .filter(|e| **e == MetaEvent::MessagesMaySkip)
                .count();
        }
        assert_eq!(emitted, 3);
        assert_eq!(may_skip_count, 1);

        // Roll over the window: 7 were skipped.
        let o = t.check(key(), true, 1_000);
        assert!(o.emit);
        assert_eq!(o.meta_events, vec![MetaEvent::PreviousMessagesSkipped(7)]);
    }

    #[test]
    fn zero_limit_disables_throttling() {
        let t = Throttler::new(1_000, 0);
        for i in 0..100 {
            let o = t.check(key(), true, i);
            assert!(o.emit);
            assert!(o.meta_events.is_empty());
        }
    }

    #[test]
    fn non_throttleable_always_emits_and_is_not_counted() {
        let t = Throttler::new(1_000, 1);
        for i in 0..10 {
            let o = t.check(key(), false, i);
            assert!(o.emit);
            assert!(o.meta_events.is_empty());
        }
        // The throttleable key's own window is untouched.
        let o = t.check(key(), true, 0);
        assert!(o.emit);
    }

    #[test]
    fn may_skip_emitted_only_once_per_window() {
        let t = Throttler::new(1_000, 1);
        assert!(t.check(key(), true, 0).emit);
        let second = t.check(key(), true, 1);
        assert!(!second.emit);
        assert_eq!(second.meta_events, vec![MetaEvent::MessagesMaySkip]);
        let third = t.check(key(), true, 2);
        assert!(!third.emit);
        assert!(third.meta_events.is_empty());
    }

    #[test]
    fn independent_keys_have_independent_windows() {
        let t = Throttler::new(1_000, 1);
        let a = ThrottleKey::Ordinal(CacheMessage::ResyncIsTooLate);
        let b = ThrottleKey::Ordinal(CacheMessage::SplitForWriteFail);
        assert!(t.check(a.clone(), true, 0).emit);
        assert!(t.check(b.clone(), true, 0).emit);
        assert!(!t.check(a, true, 1).emit);
        assert!(!t.check(b, true, 1).emit);
    }

    #[test]
    fn rollover_with_no_skips_emits_no_meta() {
        let t = Throttler::new(100, 5);
        assert!(t.check(key(), true, 0).emit);
        let o = t.check(key(), true, 200);
        assert!(o.emit);
        assert!(o.meta_events.is_empty());
    }
}
