//! Timestamp storage formats and Berlin civil-time conversion.
//!
//! Instants are stored as UTC text of fixed width (`YYYY-MM-DDTHH:MM:SSZ`) so
//! that lexicographic comparison in SQL equals chronological comparison.
//! Human-visible date fields (expiry date, accept date) are calendar days in
//! Europe/Berlin.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::Berlin;

use crate::errors::{ErxError, ErxResult};

const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DB_DATE_FORMAT: &str = "%Y-%m-%d";

/// Truncate an instant to whole seconds. The database stores second
/// precision; the value returned from task creation is the rounded one.
pub fn round_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(instant.timestamp(), 0).unwrap()
}

/// Render an instant in the storage format.
pub fn to_db_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(DB_TIMESTAMP_FORMAT).to_string()
}

pub fn parse_db_timestamp(text: &str) -> ErxResult<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(text, DB_TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ErxError::internal(format!("malformed stored timestamp: {text}")))
}

/// Render a calendar date in the storage format.
pub fn to_db_date(date: NaiveDate) -> String {
    date.format(DB_DATE_FORMAT).to_string()
}

pub fn parse_db_date(text: &str) -> ErxResult<NaiveDate> {
    NaiveDate::parse_from_str(text, DB_DATE_FORMAT)
        .map_err(|_| ErxError::internal(format!("malformed stored date: {text}")))
}

/// The calendar day in Berlin on which the given instant falls.
pub fn berlin_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Berlin).date_naive()
}

/// Add a number of Berlin calendar days to an instant's Berlin day.
/// Used for expiry and accept dates at task activation.
pub fn berlin_date_plus_days(instant: DateTime<Utc>, days: i64) -> NaiveDate {
    berlin_date(instant) + Duration::days(days)
}
