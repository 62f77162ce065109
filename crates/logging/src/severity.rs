//! Severity taxonomy (spec §4.1): an ordered index for "at or above"
//! comparisons, plus a category that disambiguates external/internal/data-loss
//! causes that share the same ordinal position.

use std::fmt;

/// Severity of a logged event, in ascending order of severity.
///
/// The derived `PartialOrd`/`Ord` rely on declaration order, which gives
/// `severity_index()` for free: `Severity::Warn as u8 < Severity::Error as u8`
/// exactly mirrors "WARN is less severe than ERROR".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    /// Fine-grained tracing, never user-facing.
    Trace,
    /// Developer diagnostics.
    Debug,
    /// Informational event caused by external (embedder/storage) behavior.
    ExternalInfo,
    /// Informational event.
    Info,
    /// Warning caused by external (embedder/storage) behavior.
    ExternalWarn,
    /// Caller supplied invalid input.
    InvalidUserInput,
    /// Internal warning.
    Warn,
    /// Error caused by external (embedder/storage) behavior.
    ExternalError,
    /// A security-relevant error.
    SecurityError,
    /// Internal error.
    Error,
    /// Data for a key was lost, caused by external behavior (e.g. a storage
    /// write that exhausted retries).
    ExternalDataLoss,
    /// Data for a key was lost due to an internal decision.
    DataLoss,
    /// The most severe category: invariants are at risk.
    Critical,
}

impl Severity {
    /// All severities in ascending order, for iteration (e.g. building a
    /// per-severity stats array).
    pub const ALL: [Severity; 13] = [
        Severity::Trace,
        Severity::Debug,
        Severity::ExternalInfo,
        Severity::Info,
        Severity::ExternalWarn,
        Severity::InvalidUserInput,
        Severity::Warn,
        Severity::ExternalError,
        Severity::SecurityError,
        Severity::Error,
        Severity::ExternalDataLoss,
        Severity::DataLoss,
        Severity::Critical,
    ];

    /// The total order index used for "at or above" comparisons.
    pub const fn severity_index(self) -> u8 {
        self as u8
    }

    /// `true` if this severity is ERROR or higher in the total order.
    pub fn is_error_or_higher(self) -> bool {
        self.severity_index() >= Severity::Error.severity_index()
    }

    /// `true` if this severity denotes a data-loss event (external or
    /// internal cause).
    pub fn is_data_loss(self) -> bool {
        matches!(self, Severity::ExternalDataLoss | Severity::DataLoss)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::ExternalInfo => "EXTERNAL_INFO",
            Severity::Info => "INFO",
            Severity::ExternalWarn => "EXTERNAL_WARN",
            Severity::InvalidUserInput => "INVALID_USER_INPUT",
            Severity::Warn => "WARN",
            Severity::ExternalError => "EXTERNAL_ERROR",
            Severity::SecurityError => "SECURITY_ERROR",
            Severity::Error => "ERROR",
            Severity::ExternalDataLoss => "EXTERNAL_DATA_LOSS",
            Severity::DataLoss => "DATA_LOSS",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}
