//! Wire format for timestamps carried in headers.
//!
//! `yyyy-MM-dd HH:mm:ss:ffffff Z`, always UTC. Note the colon before the
//! fractional part.

use chrono::{DateTime, NaiveDateTime, Utc};

const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%6f Z";

/// Format a UTC timestamp for use in a header value.
pub fn to_wire_format(time: DateTime<Utc>) -> String {
    time.format(WIRE_FORMAT).to_string()
}

/// Parse a header value produced by [`to_wire_format`].
pub fn from_wire_format(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), WIRE_FORMAT).map(|naive| naive.and_utc())
}
