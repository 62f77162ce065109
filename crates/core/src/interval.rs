//! Time interval parsing: `"<N>{ms|s|m|h|d}"` → milliseconds.
//!
//! Per spec §6/§8: configuration values such as `logThrottleTimeInterval`
//! accept a count-and-unit string. Parsing is pure and infallible-on-success;
//! malformed input returns [`IntervalError`].

use std::fmt;
use std::time::Duration;

/// Error parsing a time interval string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    /// The string had no recognised unit suffix.
    #[error("missing or unrecognised time unit in {0:?} (expected ms|s|m|h|d)")]
    UnrecognisedUnit(String),
    /// The numeric portion could not be parsed as a non-negative integer.
    #[error("invalid count in time interval {0:?}")]
    InvalidCount(String),
}

/// A parsed, non-negative time interval, stored internally in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalMs(pub u64);

impl IntervalMs {
    /// Construct directly from a millisecond count.
    pub const fn from_millis(ms: u64) -> Self {
        IntervalMs(ms)
    }

    /// The interval as a raw millisecond count.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// The interval as a [`Duration`].
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Parse a `"<N>{ms|s|m|h|d}"` string.
    ///
    /// Examples: `parse("35ms") == 35`, `parse("35s") == 35_000`,
    /// `parse("35m") == 2_100_000`, `parse("35h") == 126_000_000`,
    /// `parse("35d") == 3_024_000_000`.
    pub fn parse(s: &str) -> Result<Self, IntervalError> {
        let s = s.trim();
        // Check the two-letter unit "ms" before the one-letter units, since
        // "ms" ends in "s" and would otherwise be misread as unit "s".
        let (digits, unit_ms): (&str, u64) = if let Some(d) = s.strip_suffix("ms") {
            (d, 1)
        } else if let Some(d) = s.strip_suffix('s') {
            (d, 1_000)
        } else if let Some(d) = s.strip_suffix('m') {
            (d, 60_000)
        } else if let Some(d) = s.strip_suffix('h') {
            (d, 3_600_000)
        } else if let Some(d) = s.strip_suffix('d') {
            (d, 86_400_000)
        } else {
            return Err(IntervalError::UnrecognisedUnit(s.to_string()));
        };

        let count: u64 = digits
            .parse()
            .map_err(|_| IntervalError::InvalidCount(s.to_string()))?;

        Ok(IntervalMs(count.saturating_mul(unit_ms)))
    }
}

impl fmt::Display for IntervalMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl TryFrom<&str> for IntervalMs {
    type Error = IntervalError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        IntervalMs::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(IntervalMs::parse("35ms").unwrap().as_millis(), 35);
        assert_eq!(IntervalMs::parse("35s").unwrap().as_millis(), 35_000);
        assert_eq!(IntervalMs::parse("35m").unwrap().as_millis(), 2_100_000);
        assert_eq!(IntervalMs::parse("35h").unwrap().as_millis(), 126_000_000);
        assert_eq!(
            IntervalMs::parse("35d").unwrap().as_millis(),
            3_024_000_000
        );
    }

    #[test]
    fn zero_is_valid() {
        assert_eq!(IntervalMs::parse("0ms").unwrap().as_millis(), 0);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(matches!(
            IntervalMs::parse("35x"),
            Err(IntervalError::UnrecognisedUnit(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_count() {
        assert!(matches!(
            IntervalMs::parse("abcms"),
            Err(IntervalError::InvalidCount(_))
        ));
    }

    #[test]
    fn rejects_empty_string() {
        assert!(IntervalMs::parse("").is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trips_for_any_count(n in 0u64..1_000_000) {
            for (unit, mult) in [("ms", 1u64), ("s", 1_000), ("m", 60_000), ("h", 3_600_000), ("d", 86_400_000)] {
                let s = format!("{n}{unit}");
                let parsed = IntervalMs::parse(&s).unwrap();
                proptest::prop_assert_eq!(parsed.as_millis(), n.saturating_mul(mult));
            }
        }
    }
}
