//! External collaborator traits: the storage backend and the format adapters.
//!
//! Both are narrow interfaces supplied by the embedder (spec §1/§6); the
//! cache depends only on these traits, never on a concrete backend.

/// The slow/unreliable backing store the cache sits in front of.
///
/// Implementations must be safe to call concurrently for distinct keys
/// (spec §6). The cache itself guarantees at most one in-flight read and one
/// in-flight write per key — `Storage` does not need to serialise internally
/// per key, but concurrent calls for *different* keys must not block each
/// other indefinitely.
pub trait Storage<K, S>: Send + Sync {
    /// The error type surfaced by this backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read the current stored value for `key`.
    fn read(&self, key: &K) -> Result<S, Self::Error>;

    /// Write `value` for `key`.
    ///
    /// Idempotency is *not* assumed: the cache guarantees writes for a given
    /// key are issued serially, never concurrently.
    fn write(&self, key: &K, value: S) -> Result<(), Self::Error>;
}

/// Pure conversion functions between the cache's external and internal value
/// representations (spec §3/§6). Supplied as a trait object (not closures) so
/// it can be shared across worker threads behind an `Arc`.
pub trait Adapters<K, V, Uext, Uint, S, C, R>: Send + Sync {
    /// `Uext -> Uint`: convert an externally-submitted update into the
    /// internal update representation buffered on the entry.
    fn convert_update_from_external(
        &self,
        key: &K,
        update: Uext,
    ) -> Result<Uint, AdapterError>;

    /// `S -> C`: convert freshly-read storage data into the cached
    /// representation.
    fn convert_from_storage(&self, key: &K, data: S) -> Result<C, AdapterError>;

    /// `C -> R`: convert the cached representation into the value handed
    /// back from `read()`.
    fn convert_to_return_value(&self, key: &K, cached: &C) -> Result<R, AdapterError>;

    /// Merge a resync read's storage snapshot with the set of updates that
    /// accumulated while the read was in flight.
    fn merge(
        &self,
        key: &K,
        cached: Option<&C>,
        storage: S,
        pending: &[Uint],
    ) -> Result<C, AdapterError>;

    /// Apply a single buffered update to the cached representation, used
    /// when an update arrives and there is no in-flight resync to merge with.
    fn apply_update(&self, key: &K, update: &Uint, cached: C) -> Result<C, AdapterError>;

    /// Split a cached value before writing it to storage into the part that
    /// is persisted (`S`) and the part that remains cached afterwards (`C`).
    fn split_for_write(&self, key: &K, cached: C) -> Result<(C, S), AdapterError>;
}

/// Error from an adapter conversion. Adapters may fail on malformed or
/// unexpected data; such failures are classified EXTERNAL_DATA_LOSS by the
/// caller (spec §6), carrying the key that triggered them.
#[derive(Debug, thiserror::Error)]
#[error("adapter conversion failed: {message}")]
pub struct AdapterError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl AdapterError {
    /// Construct an adapter error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        AdapterError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_trait_is_object_safe() {
        fn accepts_storage<K, S>(_s: &dyn Storage<K, S, Error = std::io::Error>) {}
        let _ = accepts_storage::<(), ()> as fn(&dyn Storage<(), (), Error = std::io::Error>);
    }

    #[test]
    fn adapter_error_message_round_trips() {
        let e = AdapterError::new("boom");
        assert_eq!(e.to_string(), "adapter conversion failed: boom");
    }
}
