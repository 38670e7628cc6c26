//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: a fire time that cannot be parsed or rendered
//! - `TriggerServiceError`: a failed call against the trigger service,
//!   classified so callers can decide whether to retry
//! - `ClientSetupError`: constructing a service client failed (reported
//!   through rootcause at process start)

use std::fmt;

/// Errors from fire-time parsing and schedule expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The timestamp is empty or does not match any accepted layout.
    InvalidTimestamp { value: String, reason: String },
    /// The local time does not exist in the timezone (DST gap).
    NonexistentLocalTime { value: String, timezone: String },
    /// Unknown IANA timezone name.
    InvalidTimezone { timezone: String },
    /// A schedule expression that is not a one-shot `at(...)` literal.
    InvalidExpression { expression: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimestamp { value, reason } => {
                write!(f, "invalid timestamp '{value}': {reason}")
            }
            Self::NonexistentLocalTime { value, timezone } => {
                write!(f, "local time '{value}' does not exist in {timezone}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
            Self::InvalidExpression { expression } => {
                write!(f, "not a one-shot schedule expression: {expression}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from trigger service calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerServiceError {
    /// No trigger with this name exists in the group.
    NotFound { name: String },
    /// A trigger with this name already exists in the group.
    Conflict { name: String },
    /// The service throttled the request.
    Throttled { message: String },
    /// The call did not complete within the client timeout.
    Timeout,
    /// Server-side or transport failure.
    Unavailable { status: Option<u16>, message: String },
    /// The service refused the request (validation, authorization, bad target).
    Rejected { status: u16, message: String },
    /// The client does not implement this operation.
    Unsupported { operation: &'static str },
    /// The service answered with a body the client could not interpret.
    InvalidResponse { message: String },
}

impl TriggerServiceError {
    /// Returns true for failures worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Timeout | Self::Unavailable { .. }
        )
    }
}

impl fmt::Display for TriggerServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "trigger not found: {name}"),
            Self::Conflict { name } => write!(f, "trigger already exists: {name}"),
            Self::Throttled { message } => write!(f, "request throttled: {message}"),
            Self::Timeout => write!(f, "trigger service call timed out"),
            Self::Unavailable {
                status: Some(status),
                message,
            } => write!(f, "trigger service unavailable ({status}): {message}"),
            Self::Unavailable {
                status: None,
                message,
            } => write!(f, "trigger service unavailable: {message}"),
            Self::Rejected { status, message } => {
                write!(f, "request rejected ({status}): {message}")
            }
            Self::Unsupported { operation } => {
                write!(f, "operation not supported by client: {operation}")
            }
            Self::InvalidResponse { message } => {
                write!(f, "invalid trigger service response: {message}")
            }
        }
    }
}

impl std::error::Error for TriggerServiceError {}

/// Errors from building a trigger service client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSetupError {
    /// The endpoint is not an absolute http(s) URL.
    InvalidEndpoint { endpoint: String, reason: String },
    /// The HTTP client could not be constructed.
    HttpClient { details: String },
}

impl fmt::Display for ClientSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEndpoint { endpoint, reason } => {
                write!(f, "invalid scheduler endpoint '{endpoint}': {reason}")
            }
            Self::HttpClient { details } => {
                write!(f, "failed to build scheduler http client: {details}")
            }
        }
    }
}

impl std::error::Error for ClientSetupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TriggerServiceError::Timeout.is_transient());
        assert!(
            TriggerServiceError::Throttled {
                message: "slow down".to_string()
            }
            .is_transient()
        );
        assert!(
            TriggerServiceError::Unavailable {
                status: Some(503),
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !TriggerServiceError::Rejected {
                status: 400,
                message: "bad arn".to_string()
            }
            .is_transient()
        );
        assert!(
            !TriggerServiceError::NotFound {
                name: "r1".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn service_error_display() {
        let err = TriggerServiceError::Conflict {
            name: "r1".to_string(),
        };
        assert_eq!(err.to_string(), "trigger already exists: r1");

        let err = TriggerServiceError::Unavailable {
            status: Some(500),
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("(500)"));
    }

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::InvalidTimezone {
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(err.to_string().contains("Mars/Olympus"));
    }
}
