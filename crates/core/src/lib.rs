//! Core types shared across the WBRB cache crates.
//!
//! This crate defines the external collaborator traits (`Storage`,
//! `Adapters`), the cache's `Config` and `Error` types, and the small pure
//! parsers (`interval`, `kvstring`) used by configuration values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod interval;
pub mod kvstring;
pub mod traits;

pub use config::{Config, ConfigError};
pub use error::{Error, Result, StorageError};
pub use interval::{IntervalError, IntervalMs};
pub use kvstring::{parse_kv_string, render_kv_string, KvStringError};
pub use traits::{AdapterError, Adapters, Storage};
