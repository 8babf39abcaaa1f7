//! Implicit intervals of FHIR search dates.
//!
//! A search value `2024-02` means the half-open interval
//! `[2024-02-01T00:00:00Z, 2024-03-01T00:00:00Z)`; a full timestamp means a
//! one-second interval. Comparisons are rendered against the inclusive lower
//! bound B and the exclusive upper bound E.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use erx_types::{ErxError, ErxResult};

/// Half-open interval `[begin, end)` implied by a search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePeriod {
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimePeriod {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { begin, end }
    }

    /// Inclusive lower bound.
    pub fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// The one-tick interval of an instant embedded in a time-prefixed uuid.
    pub fn from_suuid_timestamp(instant: DateTime<Utc>) -> Self {
        Self {
            begin: instant,
            end: instant + Duration::nanoseconds(100),
        }
    }

    /// Parse a FHIR search date of any supported precision.
    ///
    /// Accepted forms: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`,
    /// `YYYY-MM-DDThh:mm[:ss]` with optional `Z` or `±hh:mm` offset.
    /// Date-only values are interpreted as UTC days.
    pub fn from_fhir_search_date(value: &str) -> ErxResult<Self> {
        if let Some(period) = Self::parse_date_form(value) {
            return Ok(period);
        }
        Self::parse_datetime_form(value)
            .ok_or_else(|| ErxError::bad_request(format!("invalid search date: {value}")))
    }

    /// Parse restricted to the plain date forms (`YYYY`, `YYYY-MM`,
    /// `YYYY-MM-DD`), as required for date columns.
    pub fn from_sql_date(value: &str) -> ErxResult<Self> {
        Self::parse_date_form(value)
            .ok_or_else(|| ErxError::bad_request(format!("invalid search date: {value}")))
    }

    fn parse_date_form(value: &str) -> Option<Self> {
        let digits_and_dashes = value.bytes().all(|b| b.is_ascii_digit() || b == b'-');
        if !digits_and_dashes {
            return None;
        }
        match value.len() {
            4 => {
                let year: i32 = value.parse().ok()?;
                let begin = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
                let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
                Some(Self { begin, end })
            }
            7 => {
                let year: i32 = value[0..4].parse().ok()?;
                let month: u32 = value[5..7].parse().ok()?;
                if value.as_bytes()[4] != b'-' {
                    return None;
                }
                let begin_date = NaiveDate::from_ymd_opt(year, month, 1)?;
                let end_date = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                Some(Self {
                    begin: Utc.from_utc_datetime(&begin_date.and_hms_opt(0, 0, 0)?),
                    end: Utc.from_utc_datetime(&end_date.and_hms_opt(0, 0, 0)?),
                })
            }
            10 => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
                let begin = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
                Some(Self {
                    begin,
                    end: begin + Duration::days(1),
                })
            }
            _ => None,
        }
    }

    fn parse_datetime_form(value: &str) -> Option<Self> {
        // minutes precision covers one minute, seconds precision one second
        for (format, span) in [
            ("%Y-%m-%dT%H:%M:%S%:z", Duration::seconds(1)),
            ("%Y-%m-%dT%H:%M%:z", Duration::seconds(60)),
        ] {
            if let Ok(parsed) = DateTime::parse_from_str(value, format) {
                let begin = parsed.with_timezone(&Utc);
                return Some(Self {
                    begin,
                    end: begin + span,
                });
            }
        }
        // trailing Z or no zone designator: interpret as UTC
        let trimmed = value.strip_suffix('Z').unwrap_or(value);
        for (format, span) in [
            ("%Y-%m-%dT%H:%M:%S", Duration::seconds(1)),
            ("%Y-%m-%dT%H:%M", Duration::seconds(60)),
        ] {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
                let begin = Utc.from_utc_datetime(&naive);
                return Some(Self {
                    begin,
                    end: begin + span,
                });
            }
        }
        None
    }

    /// The begin bound's UTC calendar date (plain-date rendering).
    pub fn begin_date(&self) -> NaiveDate {
        self.begin.date_naive()
    }

    /// The end bound's UTC calendar date.
    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }
}
