//! # Timestamp Value Object
//!
//! UTC wall-clock instant used in error metadata, statistics snapshots and
//! rate-limit reset times.
//!
//! # Examples
//!
//! ```
//! use ship_quote::domain::value_objects::timestamp::Timestamp;
//!
//! let ts = Timestamp::from_millis(1_704_067_200_000).unwrap();
//! let later = ts.add_millis(1_500);
//!
//! assert!(later.is_after(&ts));
//! assert_eq!(later.timestamp_millis(), 1_704_067_201_500);
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A UTC timestamp with millisecond resolution.
///
/// Wraps `chrono::DateTime<Utc>`. Instants produced by the crate's
/// [`Clock`](crate::application::clock::Clock) are converted with
/// [`Timestamp::from_clock_millis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from Unix milliseconds.
    ///
    /// Returns `None` if the value is out of chrono's representable range.
    ///
    /// # Examples
    ///
    /// ```
    /// use ship_quote::domain::value_objects::timestamp::Timestamp;
    ///
    /// let ts = Timestamp::from_millis(1_704_067_200_000).unwrap();
    /// assert_eq!(ts.timestamp_millis(), 1_704_067_200_000);
    /// ```
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Creates a timestamp from an unsigned clock reading in Unix milliseconds.
    ///
    /// Readings beyond the representable range clamp to the Unix epoch.
    #[must_use]
    pub fn from_clock_millis(millis: u64) -> Self {
        i64::try_from(millis)
            .ok()
            .and_then(Self::from_millis)
            .unwrap_or(Self(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// Returns the Unix timestamp in milliseconds.
    #[inline]
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Adds milliseconds to the timestamp (can be negative).
    #[must_use]
    pub fn add_millis(&self, millis: i64) -> Self {
        Self(self.0 + Duration::milliseconds(millis))
    }

    /// Returns true if this timestamp is before another.
    #[inline]
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    /// Returns true if this timestamp is after another.
    #[inline]
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self.0 > other.0
    }

    /// Formats the timestamp as RFC 3339.
    #[must_use]
    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn from_millis_round_trips() {
        let ts = Timestamp::from_millis(1_704_067_200_000).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_704_067_200_000);
    }

    #[test]
    fn from_clock_millis_clamps_out_of_range() {
        let ts = Timestamp::from_clock_millis(u64::MAX);
        assert_eq!(ts.timestamp_millis(), 0);
    }

    #[test]
    fn ordering_helpers() {
        let earlier = Timestamp::from_clock_millis(1_000);
        let later = earlier.add_millis(1);
        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&earlier));
    }

    #[test]
    fn display_is_rfc3339() {
        let ts = Timestamp::from_millis(1_704_067_200_000).unwrap();
        assert!(ts.to_string().starts_with("2024-01-01T00:00:00"));
        assert_eq!(ts.to_string(), ts.to_iso8601());
    }
}
