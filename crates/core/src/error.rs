//! Error types for the WBRB cache.
//!
//! Mirrors the cache's own error taxonomy from the spec (§7): a small set of
//! distinct, named failure kinds rather than a single catch-all string error.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the WBRB cache's public API and internal operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Admission refused: the cache is at `maxCacheElementsHardLimit`.
    #[error("cache full: hard limit of {limit} elements reached")]
    CacheFull {
        /// The configured hard limit that was hit.
        limit: usize,
    },

    /// `read()` timed out while the entry was still being loaded.
    #[error("element not yet loaded within timeout")]
    CacheElementNotYetLoaded,

    /// The entry's initial read exhausted its retry budget.
    #[error("element failed loading from storage")]
    CacheElementFailedLoading,

    /// The entry's resync read exhausted its retry budget.
    ///
    /// This affects staleness, not availability: the cached value is still
    /// served, but it is known to be stale relative to storage.
    #[error("element resync failed, cached value may be stale")]
    CacheElementFailedResync,

    /// The entry's write exhausted its retry budget; data for this key was lost.
    #[error("element write failed, data discarded")]
    CacheElementFailedWrite,

    /// `write()` was refused because the pending-update buffer is full.
    #[error("element has too many pending updates (max {max})")]
    CacheElementHasTooManyUpdates {
        /// The configured per-element update bound.
        max: usize,
    },

    /// An internal guard invariant was violated.
    ///
    /// Surfaced only when a worker observes a cache state its own logic did
    /// not account for; always paired with an ERROR-severity log event.
    #[error("illegal internal cache state: {0}")]
    IllegalCacheState(String),

    /// The storage backend reported a failure that could not be classified
    /// more specifically (e.g. the underlying `Storage` trait returned an
    /// opaque error).
    #[error("illegal external (storage) state: {0}")]
    IllegalExternalState(String),
}

impl Error {
    /// True for errors the caller may retry by calling the API again later
    /// (as opposed to terminal per-key failures).
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(
            self,
            Error::CacheFull { .. } | Error::CacheElementNotYetLoaded
        )
    }

    /// True for errors that indicate the key's data is permanently lost from
    /// the cache's perspective (write exhausted retries).
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Error::CacheElementFailedWrite)
    }
}

/// Opaque error from the embedder-supplied `Storage` backend.
///
/// The cache holds `Storage` behind a trait object so it can be shared
/// across the four worker threads without a generic parameter on every
/// queue; trait objects require a concrete associated `Error` type, so
/// embedders map their own storage error into this one at the boundary.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

impl StorageError {
    /// Wrap any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        StorageError(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_full_is_retryable() {
        let e = Error::CacheFull { limit: 10 };
        assert!(e.is_retryable_by_caller());
        assert!(!e.is_data_loss());
    }

    #[test]
    fn failed_write_is_data_loss() {
        let e = Error::CacheElementFailedWrite;
        assert!(e.is_data_loss());
        assert!(!e.is_retryable_by_caller());
    }

    #[test]
    fn too_many_updates_display_includes_max() {
        let e = Error::CacheElementHasTooManyUpdates { max: 7 };
        assert!(e.to_string().contains('7'));
    }
}
