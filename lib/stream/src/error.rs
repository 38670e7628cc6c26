//! Per-record validation failures.
//!
//! A `ValidationError` rejects one record without touching the rest of the
//! batch. Each variant renders with a stable prefix (`missing field`,
//! `unsupported kind`, ...) that shows up in logs and tests.

use std::fmt;
use timeslot_core::KeyError;
use timeslot_scheduler::ScheduleError;

/// Why a record could not be turned into a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field or attribute is absent.
    MissingField { field: String },
    /// The attribute exists but is not a string value.
    UnexpectedType { field: String, found: &'static str },
    /// `eventName` is not one of INSERT, MODIFY or REMOVE.
    UnsupportedKind { kind: String },
    /// The fire-time attribute could not be parsed.
    InvalidTimestamp { source: ScheduleError },
    /// The key is not usable as a trigger name.
    InvalidKey { source: KeyError },
}

impl ValidationError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing field: {field}"),
            Self::UnexpectedType { field, found } => {
                write!(f, "unexpected type for {field}: expected S, found {found}")
            }
            Self::UnsupportedKind { kind } => write!(f, "unsupported kind: {kind}"),
            Self::InvalidTimestamp { source } => write!(f, "invalid timestamp: {source}"),
            Self::InvalidKey { source } => write!(f, "invalid key: {source}"),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidTimestamp { source } => Some(source),
            Self::InvalidKey { source } => Some(source),
            _ => None,
        }
    }
}
