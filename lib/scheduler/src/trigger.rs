//! Trigger definitions sent to the scheduling service.

use crate::schedule::FireTime;
use serde_json::json;
use timeslot_core::ReservationKey;

/// What a fired trigger invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    /// Invocation target identifier (function ARN).
    pub arn: String,
    /// Execution identity the service assumes to invoke the target.
    pub role_arn: String,
    /// Serialized payload delivered to the target.
    pub input: String,
}

impl TargetRef {
    /// Builds a target whose payload is `{"<payload_field>": "<key>"}`.
    #[must_use]
    pub fn for_key(
        arn: impl Into<String>,
        role_arn: impl Into<String>,
        payload_field: &str,
        key: &ReservationKey,
    ) -> Self {
        Self {
            arn: arn.into(),
            role_arn: role_arn.into(),
            input: json!({ payload_field: key.as_str() }).to_string(),
        }
    }
}

/// Flexible time window mode. One-shot reservations always fire exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlexibleWindow {
    #[default]
    Off,
}

impl FlexibleWindow {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
        }
    }
}

/// What the service does with a trigger after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionAfterCompletion {
    /// Keep the completed trigger.
    None,
    /// Remove the trigger once it has fired.
    #[default]
    Delete,
}

impl ActionAfterCompletion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses the service's wire value; unknown values map to `None`.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("DELETE") {
            Self::Delete
        } else {
            Self::None
        }
    }
}

/// A named, one-shot trigger. One spec corresponds to exactly one live row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Trigger name, equal to the row key.
    pub name: ReservationKey,
    /// Group the trigger is registered in.
    pub group_name: String,
    /// When the trigger fires.
    pub fire_at: FireTime,
    /// What the trigger invokes.
    pub target: TargetRef,
    pub flexible_window: FlexibleWindow,
    pub action_after_completion: ActionAfterCompletion,
    /// Optional human-readable description.
    pub description: Option<String>,
}

impl TriggerSpec {
    /// Creates a spec with an exact window that deletes itself after firing.
    #[must_use]
    pub fn new(
        name: ReservationKey,
        group_name: impl Into<String>,
        fire_at: FireTime,
        target: TargetRef,
    ) -> Self {
        Self {
            name,
            group_name: group_name.into(),
            fire_at,
            target,
            flexible_window: FlexibleWindow::Off,
            action_after_completion: ActionAfterCompletion::Delete,
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the post-completion action.
    #[must_use]
    pub fn with_action_after_completion(mut self, action: ActionAfterCompletion) -> Self {
        self.action_after_completion = action;
        self
    }

    /// Returns true if both specs fire the same target at the same instant.
    ///
    /// Description and completion action are bookkeeping and do not count.
    #[must_use]
    pub fn same_schedule(&self, other: &Self) -> bool {
        self.fire_at.instant() == other.fire_at.instant() && self.target == other.target
    }
}
