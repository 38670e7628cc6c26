//! Client for the function runtime API.
//!
//! The platform hands out invocations over a local HTTP interface:
//!
//! - `GET  /2018-06-01/runtime/invocation/next` blocks until an event arrives
//! - `POST /2018-06-01/runtime/invocation/{id}/response` returns the result
//! - `POST /2018-06-01/runtime/invocation/{id}/error` reports a failed invocation

use crate::error::ControllerError;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;
use timeslot_core::Result;
use tokio::time::Instant;
use tracing::{debug, instrument};

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

/// One event handed out by the runtime.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    /// Epoch milliseconds by which the response must be posted.
    pub deadline_ms: Option<i64>,
    pub payload: Vec<u8>,
}

impl Invocation {
    /// The deadline as a monotonic instant.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline_ms
            .map(|deadline_ms| deadline_instant(deadline_ms, Utc::now().timestamp_millis()))
    }
}

/// Converts an epoch-millisecond deadline into an [`Instant`] relative to `now_ms`.
///
/// Deadlines already in the past map to now.
#[must_use]
pub fn deadline_instant(deadline_ms: i64, now_ms: i64) -> Instant {
    let remaining = u64::try_from(deadline_ms.saturating_sub(now_ms)).unwrap_or(0);
    Instant::now() + Duration::from_millis(remaining)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error_message: &'a str,
    error_type: &'a str,
}

/// HTTP client for the runtime API.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
    base: String,
}

impl RuntimeClient {
    /// Creates a client for the API at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api: &str) -> Result<Self, ControllerError> {
        // `next` long-polls, so no request timeout
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ControllerError::Runtime {
                details: e.to_string(),
            })?;
        Ok(Self {
            http,
            base: format!("http://{api}/{API_VERSION}/runtime/invocation"),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    /// Waits for the next invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime API is unreachable or the response
    /// lacks a request id.
    pub async fn next(&self) -> Result<Invocation, ControllerError> {
        let response = self
            .http
            .get(self.url("next"))
            .send()
            .await
            .map_err(|e| runtime_error(&e))?;
        let response = response.error_for_status().map_err(|e| runtime_error(&e))?;

        let (request_id, deadline_ms) = parse_headers(response.headers())?;
        let payload = response
            .bytes()
            .await
            .map_err(|e| runtime_error(&e))?
            .to_vec();
        debug!(%request_id, bytes = payload.len(), "Received invocation");

        Ok(Invocation {
            request_id,
            deadline_ms,
            payload,
        })
    }

    /// Posts the result of an invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime API rejects the response.
    #[instrument(skip(self, body))]
    pub async fn respond<T: Serialize + Sync>(
        &self,
        request_id: &str,
        body: &T,
    ) -> Result<(), ControllerError> {
        self.http
            .post(self.url(&format!("{request_id}/response")))
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| runtime_error(&e))?;
        Ok(())
    }

    /// Reports a failed invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime API rejects the report.
    #[instrument(skip(self, message))]
    pub async fn report_error(
        &self,
        request_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<(), ControllerError> {
        self.http
            .post(self.url(&format!("{request_id}/error")))
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&ErrorBody {
                error_message: message,
                error_type,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| runtime_error(&e))?;
        Ok(())
    }
}

fn runtime_error(err: &reqwest::Error) -> ControllerError {
    ControllerError::Runtime {
        details: err.to_string(),
    }
}

fn parse_headers(headers: &HeaderMap) -> Result<(String, Option<i64>), ControllerError> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ControllerError::Runtime {
            details: format!("invocation is missing {REQUEST_ID_HEADER}"),
        })?
        .to_string();
    let deadline_ms = headers
        .get(DEADLINE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    Ok((request_id, deadline_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn builds_invocation_urls() {
        let client = RuntimeClient::new("127.0.0.1:9001").unwrap();
        assert_eq!(
            client.url("next"),
            "http://127.0.0.1:9001/2018-06-01/runtime/invocation/next"
        );
        assert_eq!(
            client.url("abc/response"),
            "http://127.0.0.1:9001/2018-06-01/runtime/invocation/abc/response"
        );
    }

    #[test]
    fn parses_invocation_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("8476a536"));
        headers.insert(DEADLINE_HEADER, HeaderValue::from_static("1704103200000"));

        let (request_id, deadline_ms) = parse_headers(&headers).unwrap();
        assert_eq!(request_id, "8476a536");
        assert_eq!(deadline_ms, Some(1_704_103_200_000));
    }

    #[test]
    fn request_id_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(DEADLINE_HEADER, HeaderValue::from_static("1"));
        assert!(parse_headers(&headers).is_err());
    }

    #[test]
    fn unparseable_deadline_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("id"));
        headers.insert(DEADLINE_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(parse_headers(&headers).unwrap().1, None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_relative_to_now() {
        let before = Instant::now();
        let deadline = deadline_instant(10_000, 7_000);
        assert_eq!(deadline - before, Duration::from_secs(3));

        // Past deadlines collapse to now
        assert_eq!(deadline_instant(1_000, 5_000), Instant::now());
    }
}
