//! Message types: the enumerated cache events plus the non-standard
//! classifier-based escape hatch (spec §4.1, Design Note on deprecated
//! non-standard messages).

use crate::severity::Severity;
use std::fmt;

/// Identifies a logged event for throttling and stats purposes.
///
/// Enumerated messages throttle on their ordinal; non-standard messages
/// throttle on their free-form classifier string (spec §4.1: "Non-standard
/// messages carry their severity plus a free-form string classifier used in
/// place of the ordinal for throttling").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// One of the cache's enumerated event kinds.
    Standard(CacheMessage),
    /// A message logged via `log_non_standard`, keyed by a free-form
    /// classifier rather than an enum ordinal.
    NonStandard {
        /// Severity of this non-standard event.
        severity: Severity,
        /// The throttling key.
        classifier: String,
    },
}

impl MessageType {
    /// The severity this message carries.
    pub fn severity(&self) -> Severity {
        match self {
            MessageType::Standard(m) => m.severity(),
            MessageType::NonStandard { severity, .. } => *severity,
        }
    }

    /// `false` for the two throttling meta-events themselves (spec §4.1:
    /// "Throttling events themselves must carry `throttleable = false`" —
    /// the infinite-loop guard is a hard invariant). `true` for everything
    /// else, including non-standard messages.
    pub fn throttleable(&self) -> bool {
        !matches!(
            self,
            MessageType::Standard(CacheMessage::MessagesMaySkip)
                | MessageType::Standard(CacheMessage::PreviousMessagesSkipped)
        )
    }

    /// The key used to bucket this message for throttling: the enum ordinal
    /// for standard messages, the classifier string plus severity for
    /// non-standard ones (spec §4.1: "ordinal or classifier+severity" — the
    /// severity must be part of the key so a higher-severity non-standard
    /// message is never suppressed by a same-classifier message of a
    /// different severity).
    pub fn throttle_key(&self) -> ThrottleKey {
        match self {
            MessageType::Standard(m) => ThrottleKey::Ordinal(*m),
            MessageType::NonStandard { classifier, severity } => {
                ThrottleKey::Classifier(classifier.clone(), *severity)
            }
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Standard(m) => write!(f, "{m:?}"),
            MessageType::NonStandard { classifier, .. } => write!(f, "NON_STANDARD({classifier})"),
        }
    }
}

/// The key used to bucket a message for throttling purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThrottleKey {
    /// Keyed by enumerated message ordinal.
    Ordinal(CacheMessage),
    /// Keyed by a free-form classifier string plus severity (non-standard
    /// messages); severity is part of the key so two classifiers that only
    /// differ in severity never share a throttle bucket.
    Classifier(String, Severity),
}

/// Every enumerated cache event referenced by the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheMessage {
    /// Emitted once per throttle window when the limit is first exceeded.
    MessagesMaySkip,
    /// Emitted on window rollover reporting how many were skipped.
    PreviousMessagesSkipped,

    /// A read merge observed an unexpected entry state (§4.4).
    UnexpectedCacheStateForReadMerge,
    /// A worker restarted after too many `REMOVED_FROM_CACHE` retries (§4.2).
    TooManyRemovedFromCacheStateRetries,
    /// Too many pending updates were buffered for one entry (§4.2).
    TooManyCacheElementUpdates,
    /// A resync arrived too late to merge against pending updates (§4.2).
    ResyncIsTooLate,
    /// An attempt to remove a non-matching entry from the registry (§4.3).
    NotPresentElementRemovalAttempt,
    /// A write exhausted its retry budget (§4.6).
    StorageWriteFailFinal,
    /// The split-before-write adapter call failed (§4.6).
    SplitForWriteFail,
    /// `convertToReturnValue` failed on a `read()` call (§6).
    ConvertToReturnValueFail,
    /// `convertUpdateFromExternal` failed on a `write()` call (§6).
    ConvertUpdateFromExternalFail,
    /// `applyUpdate` failed while applying a direct update to a `READY`
    /// entry (§6).
    ApplyUpdateFail,
    /// An entry exhausted full resync/write cycles without success (§4.5).
    WriteFailedFinalDataDiscarded,
    /// `flush()` did not complete within its deadline (§4.8).
    FlushSpooldownNotAchieved,
    /// `shutdown()` did not complete within its deadline (§4.8).
    ShutdownSpooldownNotAchieved,
    /// Shutdown drained all dirty entries successfully (§8, scenario 5).
    ShutdownCompleted,
    /// A worker loop observed a cancellation/interrupt and is restarting (§5).
    ProcessorUnexpectedInterrupt,
    /// An SPI hook call panicked or returned an invalid decision (§4.9).
    SpiExceptionDataLoss,
    /// An SPI hook call panicked or returned an invalid decision, classified
    /// at ERROR rather than EXTERNAL_DATA_LOSS (§4.9).
    SpiExceptionError,
    /// A main-queue decision was `MAIN_QUEUE_NON_STANDARD` (§4.5).
    MainQueueNonStandard,
    /// A return-queue decision was non-standard (§4.7).
    ReturnQueueNonStandard,
    /// A main/return-queue decision was an abnormal `REMOVE_FROM_CACHE` (§4.5).
    RemoveFromCache,
    /// Test-only event retained per spec §9's open question: scope is
    /// test-observability only, never emitted by production code paths.
    TestWarn,
}

impl CacheMessage {
    /// The fixed severity each enumerated message carries.
    pub fn severity(self) -> Severity {
        use CacheMessage::*;
        match self {
            MessagesMaySkip | PreviousMessagesSkipped => Severity::Info,
            UnexpectedCacheStateForReadMerge => Severity::Error,
            TooManyRemovedFromCacheStateRetries => Severity::Error,
            TooManyCacheElementUpdates => Severity::Warn,
            ResyncIsTooLate => Severity::ExternalDataLoss,
            NotPresentElementRemovalAttempt => Severity::Error,
            StorageWriteFailFinal => Severity::ExternalDataLoss,
            SplitForWriteFail => Severity::ExternalDataLoss,
            ConvertToReturnValueFail => Severity::ExternalDataLoss,
            ConvertUpdateFromExternalFail => Severity::ExternalDataLoss,
            ApplyUpdateFail => Severity::ExternalDataLoss,
            WriteFailedFinalDataDiscarded => Severity::ExternalDataLoss,
            FlushSpooldownNotAchieved => Severity::ExternalWarn,
            ShutdownSpooldownNotAchieved => Severity::ExternalDataLoss,
            ShutdownCompleted => Severity::Info,
            ProcessorUnexpectedInterrupt => Severity::Error,
            SpiExceptionDataLoss => Severity::ExternalDataLoss,
            SpiExceptionError => Severity::Error,
            MainQueueNonStandard => Severity::ExternalWarn,
            ReturnQueueNonStandard => Severity::ExternalWarn,
            RemoveFromCache => Severity::Error,
            TestWarn => Severity::Warn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_meta_events_are_not_throttleable() {
        assert!(!MessageType::Standard(CacheMessage::MessagesMaySkip).throttleable());
        assert!(!MessageType::Standard(CacheMessage::PreviousMessagesSkipped).throttleable());
    }

    #[test]
    fn ordinary_messages_are_throttleable() {
        assert!(MessageType::Standard(CacheMessage::ResyncIsTooLate).throttleable());
        assert!(MessageType::NonStandard {
            severity: Severity::Warn,
            classifier: "x".into()
        }
        .throttleable());
    }

    #[test]
    fn non_standard_messages_throttle_on_classifier_and_severity() {
        let a = MessageType::NonStandard {
            severity: Severity::Warn,
            classifier: "foo".into(),
        };
        let b = MessageType::NonStandard {
            severity: Severity::Warn,
            classifier: "foo".into(),
        };
        assert_eq!(a.throttle_key(), b.throttle_key());

        let c = MessageType::NonStandard {
            severity: Severity::Error,
            classifier: "foo".into(),
        };
        assert_ne!(
            a.throttle_key(),
            c.throttle_key(),
            "same classifier at a different severity must not share a throttle bucket"
        );
    }

    #[test]
    fn standard_messages_throttle_on_ordinal() {
        let a = MessageType::Standard(CacheMessage::ResyncIsTooLate);
        let b = MessageType::Standard(CacheMessage::ResyncIsTooLate);
        assert_eq!(a.throttle_key(), b.throttle_key());
        let c = MessageType::Standard(CacheMessage::SplitForWriteFail);
        assert_ne!(a.throttle_key(), c.throttle_key());
    }
}
