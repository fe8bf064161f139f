use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::DomainResult;
use crate::error::DomainError;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 9999;

/// Calendar month in the reporting timezone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: Month,
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> DomainResult<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(DomainError::Validation(format!(
                "year must be between {MIN_YEAR} and {MAX_YEAR}"
            )));
        }
        let month = Month::try_from(month)
            .map_err(|_| DomainError::Validation("month must be between 1 and 12".into()))?;
        Ok(Self { year, month })
    }

    pub fn containing(at: OffsetDateTime) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn month_number(&self) -> u8 {
        self.month as u8
    }

    pub fn previous(&self) -> Self {
        match self.month {
            Month::January => Self {
                year: self.year - 1,
                month: Month::December,
            },
            month => Self {
                year: self.year,
                month: month.previous(),
            },
        }
    }

    pub fn next(&self) -> Self {
        match self.month {
            Month::December => Self {
                year: self.year + 1,
                month: Month::January,
            },
            month => Self {
                year: self.year,
                month: month.next(),
            },
        }
    }

    pub fn first_instant(&self, offset: UtcOffset) -> DomainResult<OffsetDateTime> {
        let date = Date::from_calendar_date(self.year, self.month, 1)
            .map_err(|err| DomainError::Validation(err.to_string()))?;
        Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(offset))
    }

    /// Inclusive range from the first to the last representable instant of the
    /// month.
    pub fn range(&self, offset: UtcOffset) -> DomainResult<TimeRange> {
        let start = self.first_instant(offset)?;
        let end = self.next().first_instant(offset)? - Duration::microseconds(1);
        Ok(TimeRange {
            start: Some(start),
            end: Some(end),
        })
    }

    /// True once every instant of the month lies before `now`.
    pub fn is_closed(&self, now: OffsetDateTime, offset: UtcOffset) -> bool {
        match self.next().first_instant(offset) {
            Ok(next_start) => next_start <= now,
            Err(_) => false,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month_number())
    }
}

/// Inclusive instant range. An absent bound is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn until(end: Option<OffsetDateTime>) -> Self {
        Self { start: None, end }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

pub fn offset_from_hours(hours: i8) -> UtcOffset {
    UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC)
}
