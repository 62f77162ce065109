//! Per-entry concurrency for the WBRB cache: the entry state machine (C2)
//! and the key registry (C3).
//!
//! Everything here is generic over the cache's value types and knows
//! nothing about queues, storage, or SPI policy — those live in
//! `wbrb-engine`, which depends on this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod registry;

pub use entry::{CacheEntry, EntryGuard, EntryView, Payload, Status};
pub use registry::{CacheFull, KeyRegistry};
