//! Per-entry state machine (component C2, spec §4.2).
//!
//! A `CacheEntry` holds exactly one key's cached data, pending updates and
//! status. All ten states are exhaustive; every transition requires the
//! write lock, obtained via [`CacheEntry::write`] which returns an
//! [`EntryGuard`] — the only way to mutate an entry's status or payload.
//! Observations that don't mutate use [`CacheEntry::read`], a plain read
//! lock. No code path ever holds two entries' locks at once, and no code
//! path ever upgrades a read guard to a write guard.
//!
//! Grounded on the teacher's `transaction::TransactionStatus` enum (terminal
//! variants carrying data) for the status shape, and on
//! `engine::background::BackgroundScheduler`'s condvar-based
//! wait-with-timeout for blocking callers.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// All ten states from spec.md §4.2, exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Transient: entry is being created, not yet linked into the registry.
    NotPresent,
    /// Initial store read in flight.
    InitialReadPending,
    /// Terminal failure of the initial read.
    InitialReadFailedFinal,
    /// Cached value present; no resync or write in flight.
    Ready,
    /// Resync read in flight; updates are being collected.
    ReadyResyncPending,
    /// Resync exhausted its retry budget.
    ReadyResyncFailedFinal,
    /// Write in flight.
    WritePending,
    /// Write in flight and a resync read also in flight. Disallowed by the
    /// default policy (spec.md §9's open question: reaching this state is a
    /// policy decision, never a normal transition) but retained so an SPI
    /// implementation may choose it deliberately.
    WritePendingResyncPending,
    /// Write exhausted its retry budget.
    WriteFailedFinal,
    /// Sentinel left behind after eviction so racing observers can retry.
    RemovedFromCache,
}

impl Status {
    /// `true` for the three terminal-failure states, where the entry still
    /// exists in the registry but carries no servable cached value.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            Status::InitialReadFailedFinal
                | Status::ReadyResyncFailedFinal
                | Status::WriteFailedFinal
        )
    }

    /// `true` if a cached value may be present and servable to readers.
    ///
    /// `READY_RESYNC_FAILED_FINAL` and `WRITE_FAILED_FINAL` are included:
    /// both describe a *write or resync* failure, which affects staleness or
    /// durability, not whether the last-known value can still be read (spec
    /// §7: "affects staleness, not availability").
    pub fn has_servable_value(self) -> bool {
        matches!(
            self,
            Status::Ready
                | Status::ReadyResyncPending
                | Status::ReadyResyncFailedFinal
                | Status::WritePending
                | Status::WritePendingResyncPending
                | Status::WriteFailedFinal
        )
    }
}

/// The data-carrying part of an entry: cached value, pending updates, and
/// the last read/write errors observed (spec.md glossary: "Payload").
pub struct Payload<C, Uint> {
    /// The cached value, once a read has succeeded at least once.
    pub cached: Option<C>,
    /// Updates collected while a resync or write is in flight.
    pub pending_updates: Vec<Uint>,
    /// The set of updates handed to a currently executing `merge`, kept
    /// separate from `pending_updates` so updates arriving while the merge
    /// runs (with the entry's write lock released) are not mixed into the
    /// batch already in flight (spec §3: "inFlightMerge").
    pub in_flight_merge: Option<Vec<Uint>>,
    /// Text of the most recent read failure, if any.
    pub last_read_error: Option<String>,
    /// Text of the most recent write failure, if any.
    pub last_write_error: Option<String>,
}

impl<C, Uint> Payload<C, Uint> {
    fn new() -> Self {
        Payload {
            cached: None,
            pending_updates: Vec::new(),
            in_flight_merge: None,
            last_read_error: None,
            last_write_error: None,
        }
    }
}

struct EntryInner<C, Uint> {
    status: Status,
    payload: Payload<C, Uint>,
}

/// One key's cache entry. Always held behind `Arc` once linked into a
/// `KeyRegistry` — workers and API callers share ownership, never the lock.
pub struct CacheEntry<K, C, Uint> {
    /// The key this entry is for. Immutable for the entry's lifetime.
    pub key: K,
    inner: RwLock<EntryInner<C, Uint>>,
    /// Consecutive read-retry attempts, reset on success (spec §4.4).
    pub read_retry_count: AtomicU32,
    /// Consecutive write-retry attempts, reset on success (spec §4.6).
    pub write_retry_count: AtomicU32,
    /// Full read-write cycles completed with no successful write, used by
    /// the main queue's `WRITE_FAILED_FINAL_DATA_DISCARDED` decision (§4.5).
    pub full_cycle_count: AtomicU32,
    /// Consecutive `REMOVED_FROM_CACHE` observations by a single logical
    /// operation, bounded per spec §4.2's "Remove-from-cache retry".
    pub removed_retry_count: AtomicU32,
    /// Signalled on every status transition so blocking `read()`/`flush()`
    /// callers can wake and re-check.
    status_changed: Condvar,
    status_changed_lock: Mutex<()>,
}

impl<K, C, Uint> CacheEntry<K, C, Uint> {
    /// Construct a brand-new entry in `NOT_PRESENT`, for a key about to be
    /// admitted to the registry.
    pub fn new(key: K) -> Arc<Self> {
        Arc::new(CacheEntry {
            key,
            inner: RwLock::new(EntryInner {
                status: Status::NotPresent,
                payload: Payload::new(),
            }),
            read_retry_count: AtomicU32::new(0),
            write_retry_count: AtomicU32::new(0),
            full_cycle_count: AtomicU32::new(0),
            removed_retry_count: AtomicU32::new(0),
            status_changed: Condvar::new(),
            status_changed_lock: Mutex::new(()),
        })
    }

    /// Take the read lock for observation only.
    pub fn read(&self) -> EntryView<'_, C, Uint> {
        EntryView {
            guard: self.inner.read(),
        }
    }

    /// Take the write lock. This is the only way to transition status or
    /// mutate the payload.
    pub fn write(self: &Arc<Self>) -> EntryGuard<'_, K, C, Uint> {
        let guard = self.inner.write();
        EntryGuard { entry: self, guard }
    }

    /// Block the calling thread until a status transition occurs or
    /// `timeout` elapses. Returns `true` if a transition was observed.
    pub fn wait_for_change(&self, timeout: Duration) -> bool {
        let mut lock = self.status_changed_lock.lock();
        let result = self.status_changed.wait_for(&mut lock, timeout);
        !result.timed_out()
    }

    fn notify_change(&self) {
        let _lock = self.status_changed_lock.lock();
        self.status_changed.notify_all();
    }
}

/// Read-only view into an entry, held under its read lock.
pub struct EntryView<'a, C, Uint> {
    guard: RwLockReadGuard<'a, EntryInner<C, Uint>>,
}

impl<'a, C, Uint> EntryView<'a, C, Uint> {
    /// The entry's current status.
    pub fn status(&self) -> Status {
        self.guard.status
    }

    /// The currently cached value, if any.
    pub fn cached(&self) -> Option<&C> {
        self.guard.payload.cached.as_ref()
    }

    /// Number of updates currently buffered awaiting merge or write.
    pub fn pending_update_count(&self) -> usize {
        self.guard.payload.pending_updates.len()
    }
}

/// A write-locked handle on one entry. The only way to perform a state
/// transition. Dropped at the end of the holder's scope, releasing the
/// write lock and notifying any blocked waiters.
pub struct EntryGuard<'a, K, C, Uint> {
    entry: &'a CacheEntry<K, C, Uint>,
    guard: RwLockWriteGuard<'a, EntryInner<C, Uint>>,
}

impl<'a, K, C, Uint> EntryGuard<'a, K, C, Uint> {
    /// Current status, observable without releasing the write lock.
    pub fn status(&self) -> Status {
        self.guard.status
    }

    /// Read-only access to the payload under the write lock.
    pub fn payload(&self) -> &Payload<C, Uint> {
        &self.guard.payload
    }

    /// Begin the initial store read: `NOT_PRESENT -> INITIAL_READ_PENDING`.
    pub fn begin_initial_read(&mut self) {
        self.guard.status = Status::InitialReadPending;
    }

    /// `storage-read-success` for the initial read:
    /// `INITIAL_READ_PENDING -> READY`.
    pub fn complete_initial_read(&mut self, value: C) {
        self.guard.payload.cached = Some(value);
        self.guard.payload.last_read_error = None;
        self.guard.status = Status::Ready;
        self.entry.read_retry_count.store(0, Ordering::Release);
    }

    /// `storage-read-fail`, retry decision `RETRY`: stay in
    /// `INITIAL_READ_PENDING`, record the error, bump the retry counter.
    pub fn retry_initial_read(&mut self, error: impl Into<String>) {
        self.guard.payload.last_read_error = Some(error.into());
        self.entry.read_retry_count.fetch_add(1, Ordering::AcqRel);
    }

    /// `storage-read-fail`, retry decision `FINAL_FAIL`:
    /// `INITIAL_READ_PENDING -> INITIAL_READ_FAILED_FINAL`.
    pub fn fail_initial_read_final(&mut self, error: impl Into<String>) {
        self.guard.payload.last_read_error = Some(error.into());
        self.guard.status = Status::InitialReadFailedFinal;
    }

    /// Main-queue `RESYNC` decision: `READY -> READY_RESYNC_PENDING`.
    pub fn begin_resync(&mut self) {
        self.guard.status = Status::ReadyResyncPending;
    }

    /// Buffer one update while a resync or write is in flight. Returns the
    /// new buffered count so the caller can apply the
    /// `TOO_MANY_CACHE_ELEMENT_UPDATES` limit.
    pub fn push_pending_update(&mut self, update: Uint) -> usize {
        self.guard.payload.pending_updates.push(update);
        self.guard.payload.pending_updates.len()
    }

    /// Drain the buffered updates, e.g. to hand them to `split_for_write`.
    pub fn take_pending_updates(&mut self) -> Vec<Uint> {
        std::mem::take(&mut self.guard.payload.pending_updates)
    }

    /// Snapshot the currently buffered updates into `in_flight_merge` and
    /// return a copy for the caller to pass to the external `merge` call.
    /// `pending_updates` is left empty so updates that arrive while the
    /// write lock is released for the (unbounded-duration) merge call are
    /// kept separate from the batch already in flight.
    pub fn begin_in_flight_merge(&mut self) -> Vec<Uint>
    where
        Uint: Clone,
    {
        let updates = std::mem::take(&mut self.guard.payload.pending_updates);
        self.guard.payload.in_flight_merge = Some(updates.clone());
        updates
    }

    /// A resync read completed and its result was merged successfully with
    /// any collected updates: `READY_RESYNC_PENDING -> READY`.
    pub fn complete_resync_merged(&mut self, merged: C) {
        self.guard.payload.cached = Some(merged);
        self.guard.payload.last_read_error = None;
        self.guard.payload.in_flight_merge = None;
        self.guard.status = Status::Ready;
        self.entry.read_retry_count.store(0, Ordering::Release);
    }

    /// The merge was impossible or updates overflowed: emits
    /// `RESYNC_IS_TOO_LATE` at the call site (this method only performs the
    /// mechanical part). The data-loss disposition is an SPI decision; the
    /// entry returns to `READY` with the in-flight merge batch discarded,
    /// keeping whatever was previously cached (there is no merged value to
    /// install) and keeping any updates that arrived after the merge began
    /// (they are not part of what failed to merge). This is not modeled as
    /// a distinct status: spec.md lists `RESYNC_IS_TOO_LATE` as an edge-case
    /// transition rather than a tabulated state, so the `Status` enum stays
    /// the ten spec.md names.
    pub fn resync_too_late_discard(&mut self) -> Vec<Uint> {
        let discarded = self.guard.payload.in_flight_merge.take().unwrap_or_default();
        self.guard.status = Status::Ready;
        discarded
    }

    /// Resync retry decision `RETRY`: stay in `READY_RESYNC_PENDING`.
    pub fn retry_resync(&mut self, error: impl Into<String>) {
        self.guard.payload.last_read_error = Some(error.into());
        self.entry.read_retry_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Resync retry decision `FINAL_FAIL`:
    /// `READY_RESYNC_PENDING -> READY_RESYNC_FAILED_FINAL`.
    pub fn fail_resync_final(&mut self, error: impl Into<String>) {
        self.guard.payload.last_read_error = Some(error.into());
        self.guard.status = Status::ReadyResyncFailedFinal;
    }

    /// Main-queue `WRITE` decision: `READY -> WRITE_PENDING` (or
    /// `READY_RESYNC_PENDING -> WRITE_PENDING_RESYNC_PENDING` if a resync is
    /// concurrently in flight, per the SPI-only path).
    pub fn begin_write(&mut self) {
        self.guard.status = match self.guard.status {
            Status::ReadyResyncPending => Status::WritePendingResyncPending,
            _ => Status::WritePending,
        };
    }

    /// `storage-write-success`. `remaining` is the `C_next` half of
    /// `splitForWrite`'s result, i.e. what stays cached once `S_toWrite` has
    /// been durably persisted. Clears the resync-concurrent flag if set,
    /// otherwise returns to `READY`.
    pub fn complete_write_success(&mut self, remaining: C) {
        self.guard.payload.cached = Some(remaining);
        self.guard.payload.last_write_error = None;
        self.guard.status = match self.guard.status {
            Status::WritePendingResyncPending => Status::ReadyResyncPending,
            _ => Status::Ready,
        };
        self.entry.write_retry_count.store(0, Ordering::Release);
        self.entry.full_cycle_count.store(0, Ordering::Release);
    }

    /// Write retry decision `RETRY`: stay in `WRITE_PENDING`.
    pub fn retry_write(&mut self, error: impl Into<String>) {
        self.guard.payload.last_write_error = Some(error.into());
        self.entry.write_retry_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Write retry decision `FINAL_FAIL`: `WRITE_PENDING -> WRITE_FAILED_FINAL`.
    pub fn fail_write_final(&mut self, error: impl Into<String>) {
        self.guard.payload.last_write_error = Some(error.into());
        self.guard.status = Status::WriteFailedFinal;
        self.entry.full_cycle_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Main-queue `MAIN_QUEUE_REQUEUE` after a `WRITE_FAILED_FINAL` cycle:
    /// back to `READY` to retry the whole cycle, bumping the full-cycle
    /// counter the caller checks against the data-discard bound.
    pub fn requeue_after_write_failure(&mut self) {
        self.guard.status = Status::Ready;
    }

    /// Install a freshly computed cached value without changing status.
    /// Used when `write()` applies a single update directly to a `READY`
    /// entry via the embedder's `applyUpdate`, with no resync or write in
    /// flight to merge against (spec §4.8).
    pub fn set_cached(&mut self, value: C) {
        self.guard.payload.cached = Some(value);
    }

    /// Eviction: set the sentinel before the registry unlinks the entry, so
    /// concurrent observers holding the stale `Arc` see `REMOVED_FROM_CACHE`
    /// and retry per spec §4.2/§4.3.
    pub fn mark_removed_from_cache(&mut self) {
        self.guard.status = Status::RemovedFromCache;
    }
}

impl<'a, K, C, Uint> Drop for EntryGuard<'a, K, C, Uint> {
    fn drop(&mut self) {
        self.entry.notify_change();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_read_happy_path() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        {
            let mut g = entry.write();
            assert_eq!(g.status(), Status::NotPresent);
            g.begin_initial_read();
            assert_eq!(g.status(), Status::InitialReadPending);
        }
        {
            let mut g = entry.write();
            g.complete_initial_read("value".to_string());
            assert_eq!(g.status(), Status::Ready);
        }
        assert_eq!(entry.read().cached(), Some(&"value".to_string()));
    }

    #[test]
    fn initial_read_retries_then_fails_final() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        entry.write().begin_initial_read();
        entry.write().retry_initial_read("boom");
        assert_eq!(entry.read_retry_count.load(Ordering::Acquire), 1);
        entry.write().fail_initial_read_final("boom again");
        assert_eq!(entry.read().status(), Status::InitialReadFailedFinal);
    }

    #[test]
    fn resync_too_late_discards_in_flight_batch_and_returns_to_ready() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        entry.write().begin_initial_read();
        entry.write().complete_initial_read("v0".into());
        entry.write().begin_resync();
        entry.write().push_pending_update(1);
        entry.write().push_pending_update(2);
        let in_flight = entry.write().begin_in_flight_merge();
        assert_eq!(in_flight, vec![1, 2]);
        // An update arriving after the merge began must survive the discard.
        entry.write().push_pending_update(3);
        let discarded = entry.write().resync_too_late_discard();
        assert_eq!(discarded, vec![1, 2]);
        assert_eq!(entry.read().status(), Status::Ready);
        assert_eq!(entry.read().pending_update_count(), 1);
    }

    #[test]
    fn write_pending_resync_pending_round_trips() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        entry.write().begin_initial_read();
        entry.write().complete_initial_read("v0".into());
        entry.write().begin_resync();
        entry.write().begin_write();
        assert_eq!(entry.read().status(), Status::WritePendingResyncPending);
        entry.write().complete_write_success("v1".into());
        assert_eq!(entry.read().status(), Status::ReadyResyncPending);
    }

    #[test]
    fn write_failure_cycle_tracks_full_cycle_count() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        entry.write().begin_initial_read();
        entry.write().complete_initial_read("v0".into());
        entry.write().begin_write();
        entry.write().fail_write_final("disk full");
        assert_eq!(entry.full_cycle_count.load(Ordering::Acquire), 1);
        entry.write().requeue_after_write_failure();
        assert_eq!(entry.read().status(), Status::Ready);
    }

    #[test]
    fn removed_from_cache_is_observable_then_write_lock_still_works() {
        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        entry.write().mark_removed_from_cache();
        assert_eq!(entry.read().status(), Status::RemovedFromCache);
    }

    #[test]
    fn wait_for_change_wakes_on_transition() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let entry: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        let entry2 = entry.clone();
        let started = Arc::new(AtomicBool::new(false));
        let started2 = started.clone();
        let handle = thread::spawn(move || {
            started2.store(true, Ordering::Release);
            entry2.write().begin_initial_read();
        });
        while !started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        // Poll with short waits rather than one long wait, since the status
        // change may have already happened (and been notified) before this
        // thread starts waiting on the condvar.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while entry.read().status() != Status::InitialReadPending {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for transition");
            entry.wait_for_change(Duration::from_millis(50));
        }
        handle.join().unwrap();
        assert_eq!(entry.read().status(), Status::InitialReadPending);
    }
}
