//! Time-prefixed UUIDs ("suuids").
//!
//! Primary keys of time-ordered tables (communications, audit events) embed
//! the server sent-time in their high bits so that lexicographic ordering of
//! the canonical text form equals chronological ordering.
//!
//! Layout of the 128-bit value, most significant first:
//!
//! ```text
//! | 60 bits: 100-ns ticks since Unix epoch | 4 bits: version (0b0111) | 64 bits: random |
//! ```
//!
//! The timestamp resolution is 100 nanoseconds; `timestamp()` recovers the
//! embedded instant at that resolution.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErxError, ErxResult};

const VERSION_BITS: u128 = 0x7;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Time-prefixed UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Suuid(u128);

impl Suuid {
    /// Generate a suuid embedding `sent` with fresh random low bits.
    pub fn generate(sent: DateTime<Utc>) -> ErxResult<Self> {
        Self::from_parts(sent, rand::thread_rng().next_u64())
    }

    /// Build a suuid from an instant and explicit low bits (deterministic
    /// construction for the query translator and for tests).
    pub fn from_parts(sent: DateTime<Utc>, random: u64) -> ErxResult<Self> {
        let ticks = Self::ticks_from(sent)?;
        Ok(Self((ticks as u128) << 68 | VERSION_BITS << 64 | random as u128))
    }

    /// The smallest suuid whose embedded time is `sent`. Used as a
    /// lexicographic bracket in date searches on id columns.
    pub fn lower_bound(sent: DateTime<Utc>) -> ErxResult<Self> {
        Self::from_parts(sent, 0)
    }

    fn ticks_from(sent: DateTime<Utc>) -> ErxResult<u64> {
        let seconds = sent.timestamp();
        let subsec = i64::from(sent.timestamp_subsec_nanos() / 100);
        if seconds < 0 {
            return Err(ErxError::internal("suuid timestamp before epoch".to_string()));
        }
        let ticks = seconds * TICKS_PER_SECOND + subsec;
        if ticks as u128 >= 1u128 << 60 {
            return Err(ErxError::internal("suuid timestamp out of range".to_string()));
        }
        Ok(ticks as u64)
    }

    /// Recover the embedded instant (100-ns resolution).
    pub fn timestamp(&self) -> DateTime<Utc> {
        let ticks = (self.0 >> 68) as i64;
        let seconds = ticks / TICKS_PER_SECOND;
        let nanos = (ticks % TICKS_PER_SECOND) * 100;
        Utc.timestamp_opt(seconds, nanos as u32).unwrap()
    }

    /// Parse the canonical hyphenated form.
    pub fn parse(text: &str) -> ErxResult<Self> {
        let parsed = Uuid::try_parse(text)
            .map_err(|_| ErxError::bad_request(format!("malformed suuid: {text}")))?;
        Ok(Self(parsed.as_u128()))
    }
}

impl fmt::Display for Suuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0).hyphenated())
    }
}

impl TryFrom<String> for Suuid {
    type Error = ErxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Suuid::parse(&value)
    }
}

impl From<Suuid> for String {
    fn from(value: Suuid) -> Self {
        value.to_string()
    }
}
