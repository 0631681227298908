//! Replication stamps.
//!
//! `updated_at` is the sole ordering key for replication. A `Stamp` wraps an
//! RFC 3339 instant and serializes as the ISO-8601 string the backend stores.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::CoreError;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Stamp {
    pub const EPOCH: Stamp = Stamp(OffsetDateTime::UNIX_EPOCH);

    pub fn now() -> Self {
        Stamp(OffsetDateTime::now_utc())
    }

    /// Current time, but never at or behind `prev`.
    ///
    /// Every mutation must advance `updated_at` even under clock skew, so a
    /// stale wall clock falls back to one millisecond past the previous stamp.
    pub fn now_after(prev: Stamp) -> Self {
        let now = Self::now();
        if now > prev { now } else { prev.bump() }
    }

    /// One millisecond later.
    pub fn bump(self) -> Self {
        Stamp(self.0 + Duration::from_millis(1))
    }

    pub fn max(self, other: Stamp) -> Stamp {
        if other > self { other } else { self }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        OffsetDateTime::parse(raw, &Rfc3339)
            .map(Stamp)
            .map_err(|e| CoreError::InvalidStamp {
                raw: raw.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_rfc3339(&self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("<unformattable>"))
    }

    /// Deterministic stamp for fixtures.
    pub fn from_unix_ms(ms: u64) -> Self {
        Stamp(OffsetDateTime::UNIX_EPOCH + Duration::from_millis(ms))
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stamp({})", self.as_rfc3339())
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_time() {
        let a = Stamp::parse("2024-01-01T00:00:00Z").unwrap();
        let b = Stamp::parse("2024-01-01T00:00:01Z").unwrap();
        assert!(a < b);
        assert_eq!(a.max(b), b);
        assert_eq!(b.max(a), b);
    }

    #[test]
    fn serde_round_trips_as_iso_string() {
        let stamp = Stamp::parse("2024-06-15T12:30:45Z").unwrap();
        let json = serde_json::to_value(stamp).unwrap();
        assert!(json.is_string());
        let back: Stamp = serde_json::from_value(json).unwrap();
        assert_eq!(back, stamp);
    }

    #[test]
    fn now_after_never_moves_backwards() {
        let future = Stamp::now().bump().bump();
        let next = Stamp::now_after(future);
        assert!(next > future);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Stamp::parse("not a timestamp").is_err());
    }
}
