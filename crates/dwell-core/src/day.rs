//! Calendar bucketing: day keys, day-boundary slice splitting, week windows.
//!
//! All aggregation is keyed by [`DayKey`], a calendar date in the tracker's
//! configured timezone. The schedule owns the UTC offset and the week-start
//! weekday so day and week boundaries are computed in one place.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest timezone offset accepted, in minutes (UTC+14 / UTC-14).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// A calendar date bucket in the tracker's configured timezone.
///
/// Day keys order chronologically and render as `YYYY-MM-DD`, so their
/// string form sorts correctly in storage as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    #[must_use]
    pub const fn date(self) -> NaiveDate {
        self.0
    }

    /// The previous calendar day.
    #[must_use]
    pub fn pred(self) -> Self {
        Self(self.0 - Duration::days(1))
    }

    /// The next calendar day.
    #[must_use]
    pub fn succ(self) -> Self {
        Self(self.0 + Duration::days(1))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Error type for unparseable day key strings.
#[derive(Debug, Clone, Error)]
#[error("invalid day key: {0}")]
pub struct InvalidDayKey(String);

impl FromStr for DayKey {
    type Err = InvalidDayKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| InvalidDayKey(s.to_string()))
    }
}

impl Serialize for DayKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error constructing a [`DaySchedule`].
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    /// Offset outside the valid timezone range.
    #[error("utc offset out of range: {0} minutes")]
    OffsetOutOfRange(i32),
}

/// Day and week boundary configuration.
///
/// The offset shifts UTC instants into the tracker's local calendar; the
/// week start is configurable because users disagree about Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySchedule {
    utc_offset_minutes: i32,
    week_start: Weekday,
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            week_start: Weekday::Mon,
        }
    }
}

impl DaySchedule {
    pub fn new(utc_offset_minutes: i32, week_start: Weekday) -> Result<Self, ScheduleError> {
        if utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ScheduleError::OffsetOutOfRange(utc_offset_minutes));
        }
        Ok(Self {
            utc_offset_minutes,
            week_start,
        })
    }

    #[must_use]
    pub const fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    #[must_use]
    pub const fn week_start(&self) -> Weekday {
        self.week_start
    }

    /// The day bucket containing `instant`.
    #[must_use]
    pub fn day_key(&self, instant: DateTime<Utc>) -> DayKey {
        let local = instant + Duration::minutes(i64::from(self.utc_offset_minutes));
        DayKey(local.date_naive())
    }

    /// The UTC instant at which `day` begins.
    #[must_use]
    pub fn day_start(&self, day: DayKey) -> DateTime<Utc> {
        let midnight = day.0.and_hms_opt(0, 0, 0).expect("midnight is valid");
        DateTime::from_naive_utc_and_offset(midnight, Utc)
            - Duration::minutes(i64::from(self.utc_offset_minutes))
    }

    /// Splits the half-open interval `[start, end)` into per-day portions.
    ///
    /// Each portion is credited to its own day bucket; a slice that spans
    /// midnight yields one entry per day touched. Empty or inverted
    /// intervals yield nothing.
    #[must_use]
    pub fn split_slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DayKey, i64)> {
        let mut portions = Vec::new();
        if end <= start {
            return portions;
        }

        let mut cursor = start;
        while cursor < end {
            let day = self.day_key(cursor);
            let next_day_start = self.day_start(day.succ());
            let portion_end = end.min(next_day_start);
            let delta_ms = (portion_end - cursor).num_milliseconds();
            if delta_ms > 0 {
                portions.push((day, delta_ms));
            }
            cursor = portion_end;
        }
        portions
    }

    /// The inclusive `[first, last]` day range of the week containing `day`.
    #[must_use]
    pub fn week_window(&self, day: DayKey) -> (DayKey, DayKey) {
        let days_into_week = (7 + day.0.weekday().num_days_from_monday()
            - self.week_start.num_days_from_monday())
            % 7;
        let first = DayKey(day.0 - Duration::days(i64::from(days_into_week)));
        let last = DayKey(first.0 + Duration::days(6));
        (first, last)
    }
}
