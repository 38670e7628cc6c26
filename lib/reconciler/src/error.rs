//! Error types for the reconciler crate.

use std::fmt;
use timeslot_scheduler::{Operation, TriggerServiceError};

/// Why an entry could not be reconciled.
///
/// Every variant leaves the entry unacknowledged so the feed redelivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A service call failed permanently or ran out of retries.
    Service {
        operation: Operation,
        attempts: u32,
        source: TriggerServiceError,
    },
    /// The invocation deadline arrived before the entry finished.
    DeadlineExceeded,
    /// An earlier entry for the same key failed, so this one was held back
    /// to keep the key's changes in delivery order.
    Blocked {
        /// Batch position of the failed entry.
        index: usize,
    },
}

impl ReconcileError {
    /// The underlying service error, if any.
    #[must_use]
    pub fn service_error(&self) -> Option<&TriggerServiceError> {
        match self {
            Self::Service { source, .. } => Some(source),
            Self::DeadlineExceeded | Self::Blocked { .. } => None,
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service {
                operation,
                attempts,
                source,
            } => write!(f, "{operation} failed after {attempts} attempt(s): {source}"),
            Self::DeadlineExceeded => write!(f, "stopped at the invocation deadline"),
            Self::Blocked { index } => {
                write!(f, "held back behind failed entry {index} for the same key")
            }
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service { source, .. } => Some(source),
            Self::DeadlineExceeded | Self::Blocked { .. } => None,
        }
    }
}
