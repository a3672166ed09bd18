/// Shared helper utilities.
///
/// This module contains:
/// - Trigger date parsing (strict `YYYY-MM-DD`)
/// - Collection-window expansion
/// - Reference-timezone conversion for remote timestamps
///
/// IMPORTANT:
/// - No source-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Reference timezone for reporting remote object freshness.
///
/// Remote stores report UTC; operators of this deployment read the
/// logs in Tirana time.
pub const REFERENCE_TZ: Tz = chrono_tz::Europe::Tirane;

/// Parses a trigger date in the fixed `YYYY-MM-DD` format.
///
/// Any other format is rejected; the caller turns `None` into a
/// client-facing validation error.
pub fn parse_trigger_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Expands a (start, end) date pair into the full collection window.
///
/// The window covers both days entirely:
/// - start → 00:00:00 UTC
/// - end   → 23:59:59 UTC
pub fn window_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).expect("valid midnight"));
    let end = Utc.from_utc_datetime(&end.and_hms_opt(23, 59, 59).expect("valid end of day"));
    (start, end)
}

/// Converts a UTC instant into the reference timezone.
///
/// Used for log lines only; freshness comparisons happen on the
/// underlying instants and are timezone-independent.
pub fn to_reference_tz(ts: DateTime<Utc>) -> DateTime<Tz> {
    ts.with_timezone(&REFERENCE_TZ)
}
