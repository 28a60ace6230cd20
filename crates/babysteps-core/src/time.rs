//! Timestamp helpers.
//!
//! Every persisted timestamp is an integer count of microseconds since the
//! Unix epoch (`*_at_us` columns). In memory they are `DateTime<Utc>`.

use chrono::{DateTime, Utc};

/// Convert a timestamp to whole microseconds since the epoch.
#[must_use]
pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Convert stored microseconds back into a timestamp.
///
/// Returns `None` when the value is outside chrono's representable range.
#[must_use]
pub fn from_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// Drop sub-microsecond precision so a value survives a store round-trip
/// unchanged.
#[must_use]
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(to_micros(at)).unwrap_or(at)
}

/// Current time at store precision.
#[must_use]
pub fn now() -> DateTime<Utc> {
    truncate_to_micros(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn micros_roundtrip_is_lossless_after_truncation() {
        let at = Utc
            .timestamp_opt(1_750_000_000, 123_456_789)
            .single()
            .expect("valid timestamp");
        let truncated = truncate_to_micros(at);

        assert_eq!(truncated.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(from_micros(to_micros(truncated)), Some(truncated));
    }

    #[test]
    fn out_of_range_micros_are_rejected() {
        assert!(from_micros(i64::MAX).is_none());
    }
}
