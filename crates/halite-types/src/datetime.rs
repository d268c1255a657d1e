//! The calendar timestamp stored by `DateTime` fields.
//!
//! On disk a `DateTime` value is 10 bytes:
//!
//! ```text
//! [year:i16][month:u8][day:u8][hour:u8][min:u8][sec:u8][ms:u16][kind:u8]
//! ```
//!
//! Precision is one millisecond; sub-millisecond components are truncated
//! when a value is constructed from a [`NaiveDateTime`].

use std::cmp::Ordering;
use std::fmt::{self, Display};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// How the wall-clock reading relates to a time zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateTimeKind {
    /// No time zone information.
    #[default]
    Unspecified,
    /// The reading is UTC.
    Utc,
    /// The reading is in the machine's local zone.
    Local,
}

impl DateTimeKind {
    /// Returns the on-disk kind byte.
    pub fn as_byte(self) -> u8 {
        match self {
            DateTimeKind::Unspecified => 0,
            DateTimeKind::Utc => 1,
            DateTimeKind::Local => 2,
        }
    }

    /// Looks a kind up by its on-disk byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DateTimeKind::Unspecified),
            1 => Some(DateTimeKind::Utc),
            2 => Some(DateTimeKind::Local),
            _ => None,
        }
    }
}

/// A millisecond-precision calendar timestamp with a [`DateTimeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbDateTime {
    datetime: NaiveDateTime,
    kind: DateTimeKind,
}

impl DbDateTime {
    /// Wraps a [`NaiveDateTime`], truncating to millisecond precision.
    pub fn new(datetime: NaiveDateTime, kind: DateTimeKind) -> Self {
        let millis = datetime.time().nanosecond() / 1_000_000;
        let time = NaiveTime::from_hms_milli_opt(
            datetime.time().hour(),
            datetime.time().minute(),
            datetime.time().second(),
            millis,
        )
        .unwrap_or(datetime.time());
        Self {
            datetime: NaiveDateTime::new(datetime.date(), time),
            kind,
        }
    }

    /// Builds a timestamp from calendar components.
    ///
    /// Returns `None` for out-of-range components (including years outside
    /// the i16 range the wire format can carry).
    pub fn from_parts(
        year: i16,
        month: u8,
        day: u8,
        hour: u8,
        min: u8,
        sec: u8,
        millis: u16,
        kind: DateTimeKind,
    ) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?;
        let time = NaiveTime::from_hms_milli_opt(
            u32::from(hour),
            u32::from(min),
            u32::from(sec),
            u32::from(millis),
        )?;
        Some(Self {
            datetime: NaiveDateTime::new(date, time),
            kind,
        })
    }

    /// Parses common textual forms: RFC 3339 (`2024-05-01T12:30:00Z`) and
    /// `YYYY-MM-DD HH:MM:SS[.fff]`, plus a bare `YYYY-MM-DD` date.
    pub fn parse(text: &str) -> Option<Self> {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
            return Some(Self::new(dt.naive_utc(), DateTimeKind::Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Some(Self::new(dt, DateTimeKind::Unspecified));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
            return Some(Self::new(
                NaiveDateTime::new(date, midnight),
                DateTimeKind::Unspecified,
            ));
        }
        None
    }

    /// The wrapped timestamp.
    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    /// The time-zone kind.
    pub fn kind(&self) -> DateTimeKind {
        self.kind
    }

    /// Decomposes into the wire components.
    ///
    /// Returns `None` if the year does not fit the i16 wire field.
    pub fn to_parts(&self) -> Option<(i16, u8, u8, u8, u8, u8, u16, u8)> {
        let year = i16::try_from(self.datetime.date().year()).ok()?;
        Some((
            year,
            self.datetime.date().month() as u8,
            self.datetime.date().day() as u8,
            self.datetime.time().hour() as u8,
            self.datetime.time().minute() as u8,
            self.datetime.time().second() as u8,
            (self.datetime.time().nanosecond() / 1_000_000) as u16,
            self.kind.as_byte(),
        ))
    }
}

impl PartialOrd for DbDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DbDateTime {
    fn cmp(&self, other: &Self) -> Ordering {
        // Kind participates only as a tiebreaker so that Ord stays
        // consistent with Eq.
        self.datetime
            .cmp(&other.datetime)
            .then_with(|| self.kind.as_byte().cmp(&other.kind.as_byte()))
    }
}

impl Display for DbDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.datetime.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

impl From<NaiveDateTime> for DbDateTime {
    fn from(datetime: NaiveDateTime) -> Self {
        Self::new(datetime, DateTimeKind::Unspecified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_roundtrip() {
        let dt = DbDateTime::from_parts(2024, 5, 1, 12, 30, 45, 250, DateTimeKind::Utc).unwrap();
        let parts = dt.to_parts().unwrap();
        assert_eq!(parts, (2024, 5, 1, 12, 30, 45, 250, 1));
    }

    #[test]
    fn sub_millisecond_truncated() {
        let raw = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_nano_opt(3, 4, 5, 123_456_789)
            .unwrap();
        let dt = DbDateTime::new(raw, DateTimeKind::Unspecified);
        assert_eq!(dt.datetime().time().nanosecond(), 123_000_000);
    }

    #[test]
    fn parses_common_forms() {
        assert!(DbDateTime::parse("2024-05-01T12:30:00Z").is_some());
        assert!(DbDateTime::parse("2024-05-01 12:30:00.5").is_some());
        assert!(DbDateTime::parse("2024-05-01").is_some());
        assert!(DbDateTime::parse("yesterday").is_none());
    }

    #[test]
    fn ordering_by_instant() {
        let early = DbDateTime::from_parts(2024, 1, 1, 0, 0, 0, 0, DateTimeKind::Utc).unwrap();
        let late = DbDateTime::from_parts(2024, 1, 1, 0, 0, 1, 0, DateTimeKind::Utc).unwrap();
        assert!(early < late);
    }
}
