//! Fire times and one-shot schedule expressions.
//!
//! Row timestamps arrive as strings. They are parsed once, reduced to whole
//! seconds, and kept as a wall-clock time in an explicit IANA timezone. The
//! trigger service receives that wall-clock time as an `at(...)` literal plus
//! the timezone name.

use crate::error::ScheduleError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use tracing::warn;

/// Layout of the wall-clock part of an `at(...)` expression.
///
/// `%H` is the 24-hour hour field; a 12-hour token here would schedule every
/// afternoon reservation twelve hours early.
const EXPRESSION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Offset-less layouts accepted from the row store, tried in order.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parses an IANA timezone name.
///
/// # Errors
///
/// Returns an error if the name is not in the timezone database.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone {
            timezone: name.to_string(),
        })
}

/// The instant a trigger fires, as wall-clock seconds in a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FireTime {
    local: NaiveDateTime,
    timezone: Tz,
}

impl FireTime {
    /// Parses a row timestamp.
    ///
    /// RFC 3339 values with an offset are converted to `timezone`; values
    /// without an offset are read as wall-clock time in `timezone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty, malformed, or names a local
    /// time that does not exist in `timezone`.
    pub fn parse(raw: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::InvalidTimestamp {
                value: raw.to_string(),
                reason: "empty".to_string(),
            });
        }

        if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
            let local = with_offset.with_timezone(&timezone).naive_local();
            return Self::from_local(whole_seconds(local, trimmed), timezone);
        }

        NAIVE_LAYOUTS
            .iter()
            .find_map(|layout| NaiveDateTime::parse_from_str(trimmed, layout).ok())
            .ok_or_else(|| ScheduleError::InvalidTimestamp {
                value: raw.to_string(),
                reason: "expected RFC 3339 or YYYY-MM-DDTHH:MM:SS".to_string(),
            })
            .and_then(|local| Self::from_local(whole_seconds(local, trimmed), timezone))
    }

    /// Builds a fire time from a wall-clock value.
    ///
    /// # Errors
    ///
    /// Returns an error if the local time falls into a DST gap.
    pub fn from_local(local: NaiveDateTime, timezone: Tz) -> Result<Self, ScheduleError> {
        if timezone.from_local_datetime(&local).earliest().is_none() {
            return Err(ScheduleError::NonexistentLocalTime {
                value: local.format(EXPRESSION_FORMAT).to_string(),
                timezone: timezone.name().to_string(),
            });
        }
        Ok(Self { local, timezone })
    }

    /// Parses an `at(YYYY-MM-DDTHH:MM:SS)` expression as reported by the service.
    ///
    /// # Errors
    ///
    /// Returns an error for recurring expressions, malformed literals, or an
    /// unknown timezone.
    pub fn from_expression(expression: &str, timezone: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidExpression {
            expression: expression.to_string(),
        };
        let literal = expression
            .trim()
            .strip_prefix("at(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let local = NaiveDateTime::parse_from_str(literal, EXPRESSION_FORMAT)
            .map_err(|_| invalid())?;
        Self::from_local(local, parse_timezone(timezone)?)
    }

    /// Renders the one-shot schedule expression, e.g. `at(2024-01-01T13:30:00)`.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("at({})", self.local.format(EXPRESSION_FORMAT))
    }

    /// Wall-clock time in [`FireTime::timezone`].
    #[must_use]
    pub const fn local(&self) -> NaiveDateTime {
        self.local
    }

    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The absolute instant this fire time denotes.
    ///
    /// Ambiguous local times (DST fold) resolve to the earlier instant.
    #[must_use]
    pub fn instant(&self) -> DateTime<Utc> {
        self.timezone
            .from_local_datetime(&self.local)
            .earliest()
            .map_or_else(|| self.local.and_utc(), |dt| dt.with_timezone(&Utc))
    }

    /// Returns true if the instant is at or before `now`.
    #[must_use]
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.instant() <= now
    }
}

impl fmt::Display for FireTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.local.format(EXPRESSION_FORMAT),
            self.timezone.name()
        )
    }
}

fn whole_seconds(local: NaiveDateTime, raw: &str) -> NaiveDateTime {
    if local.nanosecond() == 0 {
        return local;
    }
    warn!(timestamp = raw, "dropping sub-second precision from fire time");
    local.with_nanosecond(0).unwrap_or(local)
}
