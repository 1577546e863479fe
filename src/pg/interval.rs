//! Calendar intervals.
//!
//! PostgreSQL intervals mix calendar units (years, months) whose length
//! depends on the date they are applied to with fixed-length units (days and
//! time of day). [`Interval`] keeps every field separately so nothing is lost
//! in translation; [`Interval::to_duration`] only succeeds when the value has
//! no calendar component.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A calendar interval.
///
/// Fields carry independent signs, so `1 year -3 days` is representable.
/// Unit names the decoder did not recognize are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub microseconds: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, i64>,
}

/// Field names in display order, singular form.
const UNITS: [&str; 7] = [
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "microsecond",
];

impl Interval {
    /// Build an interval from all seven fields.
    pub fn from_parts(
        years: i64,
        months: i64,
        days: i64,
        hours: i64,
        minutes: i64,
        seconds: i64,
        microseconds: i64,
    ) -> Self {
        Self {
            years,
            months,
            days,
            hours,
            minutes,
            seconds,
            microseconds,
            extra: BTreeMap::new(),
        }
    }

    pub fn years(years: i64) -> Self {
        Self { years, ..Self::default() }
    }

    pub fn months(months: i64) -> Self {
        Self { months, ..Self::default() }
    }

    pub fn days(days: i64) -> Self {
        Self { days, ..Self::default() }
    }

    pub fn seconds(seconds: i64) -> Self {
        Self { seconds, ..Self::default() }
    }

    fn fields(&self) -> [i64; 7] {
        [
            self.years,
            self.months,
            self.days,
            self.hours,
            self.minutes,
            self.seconds,
            self.microseconds,
        ]
    }

    pub fn is_zero(&self) -> bool {
        self.fields().iter().all(|v| *v == 0) && self.extra.values().all(|v| *v == 0)
    }

    /// Whether the interval has a calendar component (years or months).
    pub fn has_calendar_part(&self) -> bool {
        self.years != 0 || self.months != 0
    }

    /// Convert to a fixed-length duration.
    ///
    /// Fails when years or months are non-zero, since their length depends
    /// on the calendar position the interval is applied at.
    pub fn to_duration(&self) -> Result<Duration> {
        if self.has_calendar_part() {
            return Err(Error::Range(
                "ambiguous calendar length: interval has years or months".to_string(),
            ));
        }
        if let Some(unit) = self.extra.keys().next() {
            return Err(Error::Range(format!("unknown interval unit {:?}", unit)));
        }

        let seconds = self
            .hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(self.minutes.checked_mul(60)?))
            .and_then(|hm| hm.checked_add(self.seconds))
            .ok_or_else(|| Error::Range("interval seconds overflow".to_string()))?;

        Duration::try_days(self.days)
            .zip(Duration::try_seconds(seconds))
            .and_then(|(d, s)| d.checked_add(&s))
            .and_then(|ds| ds.checked_add(&Duration::microseconds(self.microseconds)))
            .ok_or_else(|| Error::Range("interval out of range for a duration".to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0 seconds");
        }

        let mut first = true;
        let mut write_part = |f: &mut fmt::Formatter<'_>, value: i64, unit: &str, plural: bool| {
            if value == 0 {
                return Ok(());
            }
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{} {}", value, unit)?;
            if plural && value.abs() != 1 {
                f.write_str("s")?;
            }
            Ok(())
        };

        for (value, unit) in self.fields().into_iter().zip(UNITS) {
            write_part(&mut *f, value, unit, true)?;
        }
        for (unit, value) in &self.extra {
            write_part(&mut *f, *value, unit, false)?;
        }
        Ok(())
    }
}
