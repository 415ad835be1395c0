//! Timestamps are stored as Unix milliseconds.

use exn::ResultExt;
use time::OffsetDateTime;

use crate::error::{ErrorKind, Result};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Drop sub-millisecond precision, so that a value survives a round trip
/// through the registry unchanged.
pub fn truncate(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(u32::from(t.millisecond()) * 1_000_000).unwrap_or(t)
}

/// The current time, at storage precision.
pub fn now() -> OffsetDateTime {
    truncate(OffsetDateTime::now_utc())
}

pub(crate) fn to_millis(t: OffsetDateTime, field: &'static str) -> Result<i64> {
    i64::try_from(t.unix_timestamp_nanos() / NANOS_PER_MILLI).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn from_millis(ms: i64, field: &'static str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * NANOS_PER_MILLI).or_raise(|| ErrorKind::InvalidData(field))
}
