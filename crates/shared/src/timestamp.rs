//! Timestamp encoding for the attribution table
//!
//! Timestamps are stored as fixed-width UTC text so that SQLite's text
//! ordering matches chronological ordering. Rows written by older
//! deployments used `CURRENT_TIMESTAMP` style text and are still accepted.
//!
//! Legacy text carries no offset. Older deployments wrote it from the host's
//! local clock, but it is read here as UTC, so on a host not running in UTC
//! those rows are off by the host's offset. `migrate` rewrites them in the
//! stored layout under the same assumption.

use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{StoreError, StoreResult};

const STORED: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

const LEGACY: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Encode a timestamp for storage. The value is normalized to UTC.
pub fn encode(ts: OffsetDateTime) -> StoreResult<String> {
    Ok(ts.to_offset(time::UtcOffset::UTC).format(STORED)?)
}

/// Decode a stored timestamp, accepting the current and legacy layouts.
pub fn decode(column: &'static str, value: &str) -> StoreResult<OffsetDateTime> {
    if let Ok(ts) = PrimitiveDateTime::parse(value, STORED) {
        return Ok(ts.assume_utc());
    }
    if let Ok(ts) = PrimitiveDateTime::parse(value, LEGACY) {
        return Ok(ts.assume_utc());
    }
    if let Ok(ts) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(ts);
    }
    Err(StoreError::InvalidTimestamp {
        column,
        value: value.to_string(),
    })
}
