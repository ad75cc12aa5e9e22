// src/rebase/timestamp.rs
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The only accepted text form, `YYYY-MM-DD HH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TIMESTAMP_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("timestamp {0:?} is not in YYYY-MM-DD HH:MM:SS form")]
    Shape(String),

    #[error("timestamp {0:?} is not a valid calendar date and time")]
    OutOfRange(String),
}

/// A naive point in time, read and written as UTC without a zone marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn new(inner: NaiveDateTime) -> Self {
        Timestamp(inner)
    }

    /// Strict parse of `"YYYY-MM-DD HH:MM:SS"`. Surrounding whitespace is
    /// trimmed; anything else (other separators, short fields, signs, month 13,
    /// Feb 30, hour 24) is rejected.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let s = text.trim();
        let b = s.as_bytes();
        if b.len() != TIMESTAMP_LEN
            || b[4] != b'-'
            || b[7] != b'-'
            || b[10] != b' '
            || b[13] != b':'
            || b[16] != b':'
        {
            return Err(ParseError::Shape(text.to_string()));
        }
        let digits = |range: std::ops::Range<usize>| -> Result<u32, ParseError> {
            let field = &b[range];
            if !field.iter().all(u8::is_ascii_digit) {
                return Err(ParseError::Shape(text.to_string()));
            }
            Ok(field
                .iter()
                .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0')))
        };

        let year = digits(0..4)? as i32;
        let month = digits(5..7)?;
        let day = digits(8..10)?;
        let hour = digits(11..13)?;
        let min = digits(14..16)?;
        let sec = digits(17..19)?;

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ParseError::OutOfRange(text.to_string()))?;
        let time = NaiveTime::from_hms_opt(hour, min, sec)
            .ok_or_else(|| ParseError::OutOfRange(text.to_string()))?;
        Ok(Timestamp(date.and_time(time)))
    }

    /// Canonical text form; `parse(format(t)) == t` for every parsed value.
    pub fn format(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Move by whole days. The time of day never changes. `None` only when the
    /// result leaves chrono's representable range.
    pub fn shift(&self, days: i64) -> Option<Self> {
        let delta = Duration::try_days(days)?;
        self.0.checked_add_signed(delta).map(Timestamp)
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.0.time()
    }

    pub fn seconds_of_day(&self) -> u32 {
        self.0.num_seconds_from_midnight()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whole-day shift applied to every row of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DayOffset(i64);

impl DayOffset {
    pub const ZERO: DayOffset = DayOffset(0);

    pub fn new(days: i64) -> Self {
        DayOffset(days)
    }

    /// `today - start`, in days.
    pub fn between(start: NaiveDate, today: NaiveDate) -> Self {
        DayOffset((today - start).num_days())
    }

    pub fn days(&self) -> i64 {
        self.0
    }

    pub fn apply(&self, ts: &Timestamp) -> Option<Timestamp> {
        ts.shift(self.0)
    }

    /// Shift a calendar date; used to project the post-rebase range.
    pub fn apply_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.checked_add_signed(Duration::try_days(self.0)?)
    }
}

impl fmt::Display for DayOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+} days", self.0)
    }
}
