//! Per-entry reconciliation outcomes.

use crate::error::ReconcileError;
use std::fmt;
use timeslot_scheduler::FireTime;
use timeslot_stream::ValidationError;

/// Why an entry was acknowledged without changing any trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The record could not be classified.
    Invalid(ValidationError),
    /// The fire time has already passed and the policy is to skip.
    PastFireTime { fire_at: FireTime },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::PastFireTime { fire_at } => write!(f, "fire time {fire_at} is in the past"),
        }
    }
}

/// Result of driving one entry through the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Trigger state now matches the event.
    Applied,
    /// Nothing to do; acknowledged anyway.
    Skipped(SkipReason),
    /// Not reconciled; the entry must be redelivered.
    Failed(ReconcileError),
}

impl ReconciliationOutcome {
    /// Applied and skipped entries are acknowledged; failed ones are not.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Failed(err) => write!(f, "failed ({err})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failures_are_unacknowledged() {
        assert!(ReconciliationOutcome::Applied.is_acknowledged());
        assert!(
            ReconciliationOutcome::Skipped(SkipReason::Invalid(ValidationError::MissingField {
                field: "executeTimestamp".to_string()
            }))
            .is_acknowledged()
        );
        assert!(!ReconciliationOutcome::Failed(ReconcileError::DeadlineExceeded).is_acknowledged());
    }

    #[test]
    fn display() {
        let skipped = ReconciliationOutcome::Skipped(SkipReason::Invalid(
            ValidationError::UnsupportedKind {
                kind: "TRUNCATE".to_string(),
            },
        ));
        assert_eq!(skipped.to_string(), "skipped (unsupported kind: TRUNCATE)");
    }
}
