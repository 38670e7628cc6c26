//! Reconciler configuration.
//!
//! Built once at process start and shared read-only by every batch.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use timeslot_core::ReservationKey;
use timeslot_scheduler::TargetRef;

pub const DEFAULT_GROUP_NAME: &str = "reservation-scheduler-group";
pub const DEFAULT_PAYLOAD_KEY_FIELD: &str = "reservationId";

/// What to do with events whose fire time has already passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PastFireTimePolicy {
    /// Register the trigger anyway and let the service decide.
    #[default]
    Schedule,
    /// Acknowledge without creating a trigger; removes a stale one on update.
    Skip,
}

/// Everything the reconciler needs besides the service client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Namespace all triggers are created in.
    pub group_name: String,
    /// What a fired trigger invokes.
    pub target_arn: String,
    /// Identity the service assumes to invoke the target.
    pub target_role_arn: String,
    /// Field name of the row key in the trigger payload.
    pub payload_key_field: String,
    pub description: Option<String>,
    pub past_fire_time: PastFireTimePolicy,
    pub retry: RetryPolicy,
}

impl ReconcilerConfig {
    /// Creates a configuration with default group, payload field and retry policy.
    pub fn new(target_arn: impl Into<String>, target_role_arn: impl Into<String>) -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            target_arn: target_arn.into(),
            target_role_arn: target_role_arn.into(),
            payload_key_field: DEFAULT_PAYLOAD_KEY_FIELD.to_string(),
            description: None,
            past_fire_time: PastFireTimePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    #[must_use]
    pub fn with_payload_key_field(mut self, field: impl Into<String>) -> Self {
        self.payload_key_field = field.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn with_past_fire_time(mut self, policy: PastFireTimePolicy) -> Self {
        self.past_fire_time = policy;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Target reference for the trigger of `key`.
    #[must_use]
    pub fn target_for(&self, key: &ReservationKey) -> TargetRef {
        TargetRef::for_key(
            self.target_arn.clone(),
            self.target_role_arn.clone(),
            &self.payload_key_field,
            key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let config = ReconcilerConfig::new("arn:fn", "arn:role");
        assert_eq!(config.group_name, "reservation-scheduler-group");
        assert_eq!(config.past_fire_time, PastFireTimePolicy::Schedule);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn target_carries_key_payload() {
        let config = ReconcilerConfig::new("arn:fn", "arn:role").with_payload_key_field("bookingId");
        let key = ReservationKey::parse("r1").unwrap();
        let target = config.target_for(&key);
        assert_eq!(target.arn, "arn:fn");
        assert_eq!(target.role_arn, "arn:role");
        let input: serde_json::Value = serde_json::from_str(&target.input).unwrap();
        assert_eq!(input, json!({ "bookingId": "r1" }));
    }

    #[test]
    fn past_fire_time_policy_parses_lowercase() {
        let policy: PastFireTimePolicy = serde_json::from_value(json!("skip")).unwrap();
        assert_eq!(policy, PastFireTimePolicy::Skip);
    }
}
