//! HTTP client for the scheduling service's REST surface.
//!
//! Schedules live at `{endpoint}/schedules/{name}`:
//!
//! - `POST` creates, `PUT` replaces, `DELETE` removes, `GET` reads
//! - the group is passed in the body for writes and as `groupName` otherwise
//!
//! Requests are sent unsigned. The endpoint is expected to be a signing proxy
//! or a local emulator that handles authentication.

use crate::error::{ClientSetupError, TriggerServiceError};
use crate::schedule::FireTime;
use crate::service::TriggerService;
use crate::trigger::{ActionAfterCompletion, TargetRef, TriggerSpec};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timeslot_core::ReservationKey;
use tracing::{debug, instrument};

/// Header carrying the service's error type, e.g. `ConflictException`.
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Connection settings for [`HttpTriggerService`].
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSchedulerConfig {
    /// Base URL of the scheduling service.
    pub endpoint: String,

    /// Per-request timeout enforced by the HTTP client, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Whether to reschedule with `PUT` instead of delete-then-create.
    #[serde(default = "default_atomic_update")]
    pub atomic_update: bool,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_atomic_update() -> bool {
    true
}

impl HttpSchedulerConfig {
    /// Creates a config for the given endpoint with default settings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout_ms: default_request_timeout_ms(),
            atomic_update: default_atomic_update(),
        }
    }
}

/// Trigger service backed by the scheduling REST API.
#[derive(Debug, Clone)]
pub struct HttpTriggerService {
    client: reqwest::Client,
    base: String,
    atomic_update: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduleRequest<'a> {
    group_name: &'a str,
    schedule_expression: String,
    schedule_expression_timezone: &'a str,
    flexible_time_window: FlexibleTimeWindowBody,
    target: TargetBody<'a>,
    action_after_completion: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FlexibleTimeWindowBody {
    mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TargetBody<'a> {
    arn: &'a str,
    role_arn: &'a str,
    input: &'a str,
}

impl<'a> ScheduleRequest<'a> {
    fn from_spec(spec: &'a TriggerSpec) -> Self {
        Self {
            group_name: &spec.group_name,
            schedule_expression: spec.fire_at.expression(),
            schedule_expression_timezone: spec.fire_at.timezone().name(),
            flexible_time_window: FlexibleTimeWindowBody {
                mode: spec.flexible_window.as_str(),
            },
            target: TargetBody {
                arn: &spec.target.arn,
                role_arn: &spec.target.role_arn,
                input: &spec.target.input,
            },
            action_after_completion: spec.action_after_completion.as_str(),
            description: spec.description.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetScheduleResponse {
    name: String,
    #[serde(default)]
    group_name: Option<String>,
    schedule_expression: String,
    #[serde(default)]
    schedule_expression_timezone: Option<String>,
    target: TargetResponse,
    #[serde(default)]
    action_after_completion: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetResponse {
    arn: String,
    role_arn: String,
    #[serde(default)]
    input: Option<String>,
}

impl GetScheduleResponse {
    fn into_spec(self, requested_group: &str) -> Result<TriggerSpec, TriggerServiceError> {
        let invalid = |message: String| TriggerServiceError::InvalidResponse { message };

        let name = ReservationKey::parse(self.name).map_err(|e| invalid(e.to_string()))?;
        let timezone = self.schedule_expression_timezone.as_deref().unwrap_or("UTC");
        let fire_at = FireTime::from_expression(&self.schedule_expression, timezone)
            .map_err(|e| invalid(e.to_string()))?;
        let target = TargetRef {
            arn: self.target.arn,
            role_arn: self.target.role_arn,
            input: self.target.input.unwrap_or_default(),
        };
        let group_name = self
            .group_name
            .unwrap_or_else(|| requested_group.to_string());

        let action = self
            .action_after_completion
            .as_deref()
            .map_or(ActionAfterCompletion::None, ActionAfterCompletion::from_wire);

        let mut spec = TriggerSpec::new(name, group_name, fire_at, target)
            .with_action_after_completion(action);
        spec.description = self.description;
        Ok(spec)
    }
}

/// Maps a non-success status to the error taxonomy.
fn error_for_status(
    status: u16,
    name: &str,
    error_type: Option<&str>,
    body: &str,
) -> TriggerServiceError {
    let message = match error_type {
        Some(kind) if !body.is_empty() => format!("{kind}: {body}"),
        Some(kind) => kind.to_string(),
        None => body.to_string(),
    };
    match status {
        404 => TriggerServiceError::NotFound {
            name: name.to_string(),
        },
        409 => TriggerServiceError::Conflict {
            name: name.to_string(),
        },
        429 => TriggerServiceError::Throttled { message },
        408 | 500..=599 => TriggerServiceError::Unavailable {
            status: Some(status),
            message,
        },
        _ => TriggerServiceError::Rejected { status, message },
    }
}

fn transport_error(e: &reqwest::Error) -> TriggerServiceError {
    if e.is_timeout() {
        TriggerServiceError::Timeout
    } else {
        TriggerServiceError::Unavailable {
            status: None,
            message: e.to_string(),
        }
    }
}

impl HttpTriggerService {
    /// Builds a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute http(s) URL or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &HttpSchedulerConfig) -> Result<Self, Report<ClientSetupError>> {
        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            ClientSetupError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientSetupError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ClientSetupError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            atomic_update: config.atomic_update,
        })
    }

    /// Trigger names are restricted to URL-safe characters, so no escaping is needed.
    fn schedule_url(&self, name: &ReservationKey) -> String {
        format!("{}/schedules/{}", self.base, name)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        name: &ReservationKey,
    ) -> Result<reqwest::Response, TriggerServiceError> {
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_type = response
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            // The header may carry a trailing `:<url>` qualifier
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(
            status.as_u16(),
            name.as_str(),
            error_type.as_deref(),
            &body,
        ))
    }

    async fn write(&self, method: Method, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        let request = self
            .client
            .request(method, self.schedule_url(&spec.name))
            .json(&ScheduleRequest::from_spec(spec));
        self.send(request, &spec.name).await?;
        Ok(())
    }
}

#[async_trait]
impl TriggerService for HttpTriggerService {
    #[instrument(skip(self, spec), fields(name = %spec.name, group = %spec.group_name, fire_at = %spec.fire_at))]
    async fn create(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        self.write(Method::POST, spec).await?;
        debug!("schedule created");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, group = %spec.group_name, fire_at = %spec.fire_at))]
    async fn update(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        if !self.atomic_update {
            return Err(TriggerServiceError::Unsupported { operation: "update" });
        }
        self.write(Method::PUT, spec).await?;
        debug!("schedule updated");
        Ok(())
    }

    fn supports_update(&self) -> bool {
        self.atomic_update
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn delete(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<(), TriggerServiceError> {
        let request = self
            .client
            .delete(self.schedule_url(name))
            .query(&[("groupName", group_name)]);
        self.send(request, name).await?;
        debug!("schedule deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn get(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<Option<TriggerSpec>, TriggerServiceError> {
        let request = self
            .client
            .get(self.schedule_url(name))
            .query(&[("groupName", group_name)]);
        let response = match self.send(request, name).await {
            Ok(response) => response,
            Err(TriggerServiceError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body: GetScheduleResponse =
            response
                .json()
                .await
                .map_err(|e| TriggerServiceError::InvalidResponse {
                    message: e.to_string(),
                })?;
        body.into_spec(group_name).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Tokyo;

    fn spec() -> TriggerSpec {
        let key = ReservationKey::parse("reservationId-001").unwrap();
        let target = TargetRef::for_key(
            "arn:aws:lambda:ap-northeast-1:123456789012:function:execute-function",
            "arn:aws:iam::123456789012:role/execute-function-role",
            "reservationId",
            &key,
        );
        TriggerSpec::new(
            key,
            "reservation-scheduler-group",
            FireTime::parse("2021-09-01T15:00:00", Tokyo).unwrap(),
            target,
        )
        .with_description("Execute reservation scheduler")
    }

    #[test]
    fn request_body_uses_service_field_names() {
        let spec = spec();
        let body = serde_json::to_value(ScheduleRequest::from_spec(&spec)).unwrap();

        assert_eq!(body["GroupName"], "reservation-scheduler-group");
        assert_eq!(body["ScheduleExpression"], "at(2021-09-01T15:00:00)");
        assert_eq!(body["ScheduleExpressionTimezone"], "Asia/Tokyo");
        assert_eq!(body["FlexibleTimeWindow"]["Mode"], "OFF");
        assert_eq!(body["ActionAfterCompletion"], "DELETE");
        assert_eq!(body["Description"], "Execute reservation scheduler");
        assert_eq!(
            body["Target"]["RoleArn"],
            "arn:aws:iam::123456789012:role/execute-function-role"
        );
        assert_eq!(
            body["Target"]["Input"],
            "{\"reservationId\":\"reservationId-001\"}"
        );
    }

    #[test]
    fn description_omitted_when_absent() {
        let mut spec = spec();
        spec.description = None;
        let body = serde_json::to_value(ScheduleRequest::from_spec(&spec)).unwrap();
        assert!(body.get("Description").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_for_status(404, "r1", Some("ResourceNotFoundException"), ""),
            TriggerServiceError::NotFound { .. }
        ));
        assert!(matches!(
            error_for_status(409, "r1", Some("ConflictException"), ""),
            TriggerServiceError::Conflict { .. }
        ));
        assert!(error_for_status(429, "r1", Some("ThrottlingException"), "").is_transient());
        assert!(error_for_status(503, "r1", None, "unavailable").is_transient());
        assert!(error_for_status(408, "r1", None, "").is_transient());

        let rejected = error_for_status(400, "r1", Some("ValidationException"), "bad arn");
        assert!(!rejected.is_transient());
        assert_eq!(
            rejected,
            TriggerServiceError::Rejected {
                status: 400,
                message: "ValidationException: bad arn".to_string()
            }
        );
        assert!(!error_for_status(403, "r1", Some("AccessDeniedException"), "").is_transient());
    }

    #[test]
    fn get_response_converts_to_spec() {
        let raw = serde_json::json!({
            "Name": "reservationId-001",
            "GroupName": "reservation-scheduler-group",
            "ScheduleExpression": "at(2021-09-01T15:00:00)",
            "ScheduleExpressionTimezone": "Asia/Tokyo",
            "State": "ENABLED",
            "FlexibleTimeWindow": { "Mode": "OFF" },
            "ActionAfterCompletion": "DELETE",
            "Description": "Execute reservation scheduler",
            "Target": {
                "Arn": "arn:aws:lambda:ap-northeast-1:123456789012:function:execute-function",
                "RoleArn": "arn:aws:iam::123456789012:role/execute-function-role",
                "Input": "{\"reservationId\":\"reservationId-001\"}"
            }
        });
        let response: GetScheduleResponse = serde_json::from_value(raw).unwrap();
        let parsed = response.into_spec("reservation-scheduler-group").unwrap();

        assert_eq!(parsed, spec());
        assert!(parsed.same_schedule(&spec()));
    }

    #[test]
    fn get_response_with_recurring_expression_is_invalid() {
        let raw = serde_json::json!({
            "Name": "r1",
            "ScheduleExpression": "rate(1 hour)",
            "Target": { "Arn": "a", "RoleArn": "b" }
        });
        let response: GetScheduleResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            response.into_spec("g"),
            Err(TriggerServiceError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn client_rejects_non_http_endpoints() {
        assert!(HttpTriggerService::new(&HttpSchedulerConfig::new("ftp://scheduler")).is_err());
        assert!(HttpTriggerService::new(&HttpSchedulerConfig::new("not a url")).is_err());
    }

    #[test]
    fn schedule_url_joins_base_and_name() {
        let service =
            HttpTriggerService::new(&HttpSchedulerConfig::new("http://localhost:4566/")).unwrap();
        let key = ReservationKey::parse("r1").unwrap();
        assert_eq!(
            service.schedule_url(&key),
            "http://localhost:4566/schedules/r1"
        );
        assert!(service.supports_update());
    }
}
