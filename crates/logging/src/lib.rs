//! Logging, monitoring and virtual time for the WBRB cache (component C1).
//!
//! Nothing in this crate talks about keys, entries or storage — it is pure
//! infrastructure, reused unchanged by `wbrb-concurrency` and `wbrb-engine`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod logger;
pub mod message;
pub mod severity;
pub mod stats;
pub mod throttle;
pub mod virtual_time;

pub use logger::Logger;
pub use message::{CacheMessage, MessageType, ThrottleKey};
pub use severity::Severity;
pub use stats::{LastMessageSnapshot, SeverityStats, Stats, StatsSnapshot};
pub use throttle::{MetaEvent, ThrottleOutcome, Throttler};
pub use virtual_time::{add_virtual, gap_virtual, VirtualClock};
