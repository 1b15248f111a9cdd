//! Source timestamp formatting.
//!
//! Shopify filters take an ISO-8601 timestamp with an explicit offset. The offset must be the
//! one in force in the store's timezone at that instant, so it is resolved through the IANA
//! database rather than a fixed offset.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const SOURCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Render `instant` in `tz` using the source's filter format (`YYYY-MM-DDTHH:MM:SS±HH:MM`)
pub fn format_source_timestamp(instant: DateTime<Utc>, tz: Tz) -> String {
    instant
        .with_timezone(&tz)
        .format(SOURCE_TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse an IANA timezone name such as `America/New_York`
pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| format!("unknown timezone '{name}'"))
}
