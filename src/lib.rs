//! Write-behind, resync-in-background cache.
//!
//! `wbrb` buffers writes against a slow or unreliable backing store and
//! reconciles them in the background, so `read()` and `write()` never block
//! on storage I/O beyond an initial load. This crate is a thin facade:
//! it re-exports the public surface assembled from `wbrb-core` (the
//! `Storage`/`Adapters` traits, `Config`, errors), `wbrb-concurrency` (the
//! per-entry state machine) and `wbrb-engine` (the queues and the `Cache`
//! handle itself).
//!
//! ```no_run
//! use std::sync::Arc;
//! use wbrb::{Cache, Config};
//!
//! # fn build() -> wbrb::Result<()> {
//! # let storage: Arc<dyn wbrb::Storage<String, String, Error = wbrb::StorageError>> = unimplemented!();
//! # let adapters: Arc<dyn wbrb::Adapters<String, String, String, String, String, String, String>> = unimplemented!();
//! let cache = wbrb::Cache::with_default_policy(Config::default(), storage, adapters)?;
//! # let _ = cache;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use wbrb_core::{
    parse_kv_string, render_kv_string, AdapterError, Adapters, Config, ConfigError, Error,
    IntervalError, IntervalMs, KvStringError, Result, Storage, StorageError,
};

pub use wbrb_concurrency::{CacheEntry, EntryGuard, KeyRegistry, Status};

pub use wbrb_engine::{
    guarded_spi_call, Cache, CacheStatusSnapshot, ControlState, DefaultPolicy, MainQueueDecision,
    MainQueueInput, MergeDecision, Policy, QueueStats, RetryDecision, ReturnQueueDecision,
};

pub use wbrb_logging::{CacheMessage, Severity, StatsSnapshot};
