use chrono::DateTime;
use serde_json::Number;

// Accepted by Elasticsearch's default `date_optional_time` mapping.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// The time of a log event.
pub trait EventTime {
    /// Returns the event time in whole seconds since the Unix epoch.
    ///
    /// Fractional seconds are truncated, and times beyond the range of `i64` saturate.
    fn unix_secs(&self) -> i64;
}

impl EventTime for i64 {
    fn unix_secs(&self) -> i64 {
        *self
    }
}

impl EventTime for Number {
    fn unix_secs(&self) -> i64 {
        match self.as_i64() {
            Some(secs) => secs,
            None => self.as_f64().map_or(i64::MAX, |secs| secs.trunc() as i64),
        }
    }
}

/// Formats a Unix timestamp, in seconds, as a UTC timestamp string such as `2015-11-26T03:29:54+0000`.
///
/// Returns `None` if the timestamp is outside the representable range.
pub fn format_timestamp(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|datetime| datetime.format(TIMESTAMP_FORMAT).to_string())
}
