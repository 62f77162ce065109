//! Key registry (component C3, spec §4.3).
//!
//! Grounded on the teacher's `DashMap<BranchId, Mutex<()>>` per-key locking
//! map (`crates/concurrency`'s transaction manager): one entry per key,
//! looked up and mutated through `DashMap`'s own sharded locking rather than
//! a single global mutex.

use crate::entry::CacheEntry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wbrb_logging::{CacheMessage, Logger};

/// Registry is at its hard capacity; `add` refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cache is full: {current}/{limit} elements")]
pub struct CacheFull {
    /// Current element count at the time of refusal.
    pub current: usize,
    /// The configured hard limit.
    pub limit: usize,
}

/// `KeyRegistry<K, C, Uint>` (spec §4.3): the associative map from key to
/// `CacheEntry`, plus the two size counters used for admission and
/// backpressure.
pub struct KeyRegistry<K, C, Uint> {
    entries: DashMap<K, Arc<CacheEntry<K, C, Uint>>>,
    hard_limit: usize,
    /// Current element count, tracked independently of `entries.len()` so
    /// admission checks don't race a concurrent `DashMap` resize.
    element_count: AtomicUsize,
    /// Target size for the main queue, used as C6's backpressure input
    /// (spec §4.3: "main-queue processor uses the target size as
    /// backpressure input").
    main_queue_target_size: AtomicUsize,
}

impl<K, C, Uint> KeyRegistry<K, C, Uint>
where
    K: Clone + Eq + Hash,
{
    /// Construct an empty registry with the given hard element-count limit.
    pub fn new(hard_limit: usize) -> Self {
        KeyRegistry {
            entries: DashMap::new(),
            hard_limit,
            element_count: AtomicUsize::new(0),
            main_queue_target_size: AtomicUsize::new(0),
        }
    }

    /// `add(key) -> (entry | CacheFullException)` (spec §4.3): admit a new
    /// entry if under the hard limit. Returns the existing entry if the key
    /// is already present, without double-admitting it against the limit.
    pub fn add(&self, key: K) -> Result<Arc<CacheEntry<K, C, Uint>>, CacheFull> {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(existing.clone());
        }
        let current = self.element_count.load(Ordering::Acquire);
        if current >= self.hard_limit {
            return Err(CacheFull {
                current,
                limit: self.hard_limit,
            });
        }
        let entry = CacheEntry::new(key.clone());
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(occ) => Ok(occ.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(entry.clone());
                self.element_count.fetch_add(1, Ordering::AcqRel);
                Ok(entry)
            }
        }
    }

    /// `get(key) -> Option<entry>`.
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, C, Uint>>> {
        self.entries.get(key).map(|r| r.clone())
    }

    /// `remove(key, entry)` (spec §4.3): evicts by identity. If the entry
    /// currently registered for `key` is not `entry` (pointer identity via
    /// `Arc::ptr_eq`), logs `NOT_PRESENT_ELEMENT_REMOVAL_ATTEMPT` and leaves
    /// the registry untouched. On success, marks the entry
    /// `REMOVED_FROM_CACHE` *before* unlinking it, so any thread still
    /// holding the stale `Arc` observes the sentinel and retries per §4.2.
    pub fn remove(&self, key: &K, entry: &Arc<CacheEntry<K, C, Uint>>, logger: &Logger) {
        let Some(current) = self.entries.get(key) else {
            logger.log(
                CacheMessage::NotPresentElementRemovalAttempt,
                "key absent from registry",
            );
            return;
        };
        if !Arc::ptr_eq(&*current, entry) {
            logger.log(
                CacheMessage::NotPresentElementRemovalAttempt,
                "registered entry does not match the one being removed",
            );
            return;
        }
        drop(current);
        entry.write().mark_removed_from_cache();
        self.entries.remove(key);
        self.element_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Current element count.
    pub fn len(&self) -> usize {
        self.element_count.load(Ordering::Acquire)
    }

    /// `true` if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured hard limit.
    pub fn hard_limit(&self) -> usize {
        self.hard_limit
    }

    /// Set the main queue's target size, consulted by C6 for backpressure.
    pub fn set_main_queue_target_size(&self, target: usize) {
        self.main_queue_target_size.store(target, Ordering::Release);
    }

    /// The main queue's current target size.
    pub fn main_queue_target_size(&self) -> usize {
        self.main_queue_target_size.load(Ordering::Acquire)
    }

    /// All keys currently registered, for `flush`/`shutdown` iteration.
    /// `K: Ord` isn't required here — iteration order is whatever `DashMap`
    /// yields; callers that need determinism (flush/shutdown) sort this.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        Logger::new(1.0, 1_000, 1_000)
    }

    #[test]
    fn add_then_get_round_trips() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        let e = reg.add(1).unwrap();
        let fetched = reg.get(&1).unwrap();
        assert!(Arc::ptr_eq(&e, &fetched));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn add_is_idempotent_for_existing_key() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        let a = reg.add(1).unwrap();
        let b = reg.add(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn add_refuses_past_hard_limit() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(1);
        reg.add(1).unwrap();
        let err = reg.add(2).unwrap_err();
        assert_eq!(err, CacheFull { current: 1, limit: 1 });
    }

    #[test]
    fn remove_marks_removed_from_cache_before_unlinking() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        let e = reg.add(1).unwrap();
        reg.remove(&1, &e, &logger());
        assert!(reg.get(&1).is_none());
        assert_eq!(
            e.read().status(),
            crate::entry::Status::RemovedFromCache
        );
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn remove_with_stale_entry_identity_is_a_no_op() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        let real = reg.add(1).unwrap();
        let impostor: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(1);
        reg.remove(&1, &impostor, &logger());
        assert!(reg.get(&1).is_some());
        assert_eq!(reg.len(), 1);
        assert_eq!(real.read().status(), crate::entry::Status::NotPresent);
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        let phantom: Arc<CacheEntry<u32, String, u32>> = CacheEntry::new(99);
        reg.remove(&99, &phantom, &logger());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn main_queue_target_size_round_trips() {
        let reg: KeyRegistry<u32, String, u32> = KeyRegistry::new(10);
        reg.set_main_queue_target_size(5);
        assert_eq!(reg.main_queue_target_size(), 5);
    }
}
