//! Controller configuration.
//!
//! Loaded once from environment variables via the `config` crate and never
//! changed afterwards. Nested settings use `__`, e.g. `SCHEDULER__ENDPOINT`
//! or `RETRY__MAX_ATTEMPTS`.

use crate::error::ControllerError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use timeslot_reconciler::{
    BatchProcessor, PastFireTimePolicy, Reconciler, ReconcilerConfig, RetryPolicy,
};
use timeslot_scheduler::{
    HttpSchedulerConfig, HttpTriggerService, TriggerService, Tz, parse_timezone,
};
use timeslot_stream::Classifier;

/// Controller configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Function a fired trigger invokes.
    pub execute_function_arn: String,

    /// Role the scheduling service assumes to invoke it.
    pub execute_function_role: String,

    #[serde(default = "default_group_name")]
    pub schedule_group_name: String,

    /// IANA zone for row timestamps without an offset.
    #[serde(default = "default_timezone")]
    pub schedule_timezone: String,

    #[serde(default = "default_description")]
    pub schedule_description: Option<String>,

    /// Row attribute holding the reservation key.
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,

    /// Row attribute holding the fire time.
    #[serde(default = "default_timestamp_attribute")]
    pub timestamp_attribute: String,

    /// Distinct keys reconciled in parallel within a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Time reserved before the invocation deadline, in milliseconds.
    #[serde(default = "default_deadline_margin_ms")]
    pub deadline_margin_ms: u64,

    #[serde(default)]
    pub past_fire_time: PastFireTimePolicy,

    /// Trigger service connection.
    pub scheduler: HttpSchedulerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// `host:port` of the function runtime API, set by the platform.
    #[serde(default)]
    pub aws_lambda_runtime_api: Option<String>,
}

fn default_group_name() -> String {
    timeslot_reconciler::config::DEFAULT_GROUP_NAME.to_string()
}

fn default_timezone() -> String {
    "Asia/Tokyo".to_string()
}

fn default_description() -> Option<String> {
    Some("Execute reservation scheduler".to_string())
}

fn default_key_attribute() -> String {
    timeslot_stream::classify::DEFAULT_KEY_ATTRIBUTE.to_string()
}

fn default_timestamp_attribute() -> String {
    timeslot_stream::classify::DEFAULT_TIMESTAMP_ATTRIBUTE.to_string()
}

fn default_max_concurrency() -> usize {
    1
}

fn default_deadline_margin_ms() -> u64 {
    500
}

impl ControllerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Loads configuration from an explicit variable map instead of the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a known IANA zone.
    pub fn timezone(&self) -> timeslot_core::Result<Tz, ControllerError> {
        parse_timezone(&self.schedule_timezone).map_err(|e| {
            ControllerError::Config {
                details: e.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn deadline_margin(&self) -> Duration {
        Duration::from_millis(self.deadline_margin_ms)
    }

    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let config = ReconcilerConfig::new(
            self.execute_function_arn.clone(),
            self.execute_function_role.clone(),
        )
        .with_group_name(self.schedule_group_name.clone())
        .with_payload_key_field(self.key_attribute.clone())
        .with_past_fire_time(self.past_fire_time)
        .with_retry(self.retry);
        match &self.schedule_description {
            Some(description) => config.with_description(description.clone()),
            None => config,
        }
    }

    /// Builds the record classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the timezone is invalid.
    pub fn classifier(&self) -> timeslot_core::Result<Classifier, ControllerError> {
        Ok(Classifier::new(
            self.key_attribute.clone(),
            self.timestamp_attribute.clone(),
            self.timezone()?,
        ))
    }

    /// Builds a batch processor around `service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timezone is invalid.
    pub fn processor<S: TriggerService>(
        &self,
        service: S,
    ) -> timeslot_core::Result<BatchProcessor<S>, ControllerError> {
        Ok(BatchProcessor::new(
            Reconciler::new(service, self.reconciler_config()),
            self.classifier()?,
        )
        .with_max_concurrency(self.max_concurrency)
        .with_deadline_margin(self.deadline_margin()))
    }

    /// Builds the HTTP trigger service client.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the client cannot be built.
    pub fn trigger_service(&self) -> timeslot_core::Result<HttpTriggerService, ControllerError> {
        HttpTriggerService::new(&self.scheduler).map_err(|e| {
            ControllerError::Client {
                details: e.to_string(),
            }
            .into()
        })
    }
}
