//! One invocation: payload in, partial batch response out.

use crate::error::ControllerError;
use crate::runtime::RuntimeClient;
use std::path::Path;
use timeslot_core::Result;
use timeslot_reconciler::BatchProcessor;
use timeslot_scheduler::TriggerService;
use timeslot_stream::{BatchResponse, StreamEvent};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Error type reported to the runtime for payloads that are not a batch.
const INVALID_EVENT_ERROR_TYPE: &str = "Controller.InvalidEvent";

/// Parses a change-feed batch and reconciles it.
///
/// Per-entry failures end up in the response; only a payload that is not a
/// batch at all is an error.
///
/// # Errors
///
/// Returns [`ControllerError::InvalidEvent`] if the payload cannot be parsed.
pub async fn handle_payload<S: TriggerService>(
    processor: &BatchProcessor<S>,
    payload: &[u8],
    deadline: Option<Instant>,
) -> Result<BatchResponse, ControllerError> {
    let event = StreamEvent::from_json_bytes(payload).map_err(|e| ControllerError::InvalidEvent {
        details: e.to_string(),
    })?;
    debug!(records = event.records.len(), "Received batch");

    let report = processor.process(&event.records, deadline).await;
    Ok(report.response())
}

/// Serves invocations from the runtime API until it fails.
///
/// A payload that is not a batch is reported as an invocation error; the
/// loop keeps going. Losing the runtime API ends the loop.
///
/// # Errors
///
/// Returns an error when the next invocation cannot be fetched.
pub async fn serve<S: TriggerService>(
    processor: &BatchProcessor<S>,
    runtime: &RuntimeClient,
) -> Result<(), ControllerError> {
    info!("Waiting for invocations");
    loop {
        let invocation = runtime.next().await?;
        let deadline = invocation.deadline();

        let delivered = match handle_payload(processor, &invocation.payload, deadline).await {
            Ok(response) => runtime.respond(&invocation.request_id, &response).await,
            Err(report) => {
                error!(request_id = %invocation.request_id, error = %report, "Rejecting invocation");
                runtime
                    .report_error(
                        &invocation.request_id,
                        INVALID_EVENT_ERROR_TYPE,
                        &report.to_string(),
                    )
                    .await
            }
        };
        if let Err(report) = delivered {
            error!(request_id = %invocation.request_id, error = %report, "Failed to deliver result");
        }
    }
}

/// Reads an event document from `path`, or from stdin when absent.
///
/// # Errors
///
/// Returns [`ControllerError::Input`] if the source cannot be read.
pub async fn read_event(path: Option<&Path>) -> Result<Vec<u8>, ControllerError> {
    match path {
        Some(path) => tokio::fs::read(path).await.map_err(|e| {
            ControllerError::Input {
                source: path.display().to_string(),
                details: e.to_string(),
            }
            .into()
        }),
        None => {
            let mut buffer = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| ControllerError::Input {
                    source: "stdin".to_string(),
                    details: e.to_string(),
                })?;
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use timeslot_reconciler::{Reconciler, ReconcilerConfig, RetryPolicy};
    use timeslot_scheduler::{InMemoryTriggerService, Operation, TriggerServiceError};
    use timeslot_stream::Classifier;

    const EVENT: &str = r#"{
        "Records": [
            {
                "eventID": "1",
                "eventName": "INSERT",
                "dynamodb": {
                    "NewImage": {
                        "reservationId": { "S": "r1" },
                        "executeTimestamp": { "S": "2024-01-01T10:00:00" }
                    },
                    "SequenceNumber": "111"
                }
            },
            {
                "eventID": "2",
                "eventName": "INSERT",
                "dynamodb": {
                    "NewImage": {
                        "reservationId": { "S": "r2" },
                        "executeTimestamp": { "S": "2024-01-01T22:15:00" }
                    },
                    "SequenceNumber": "222"
                }
            }
        ]
    }"#;

    fn processor(
        service: &Arc<InMemoryTriggerService>,
    ) -> BatchProcessor<Arc<InMemoryTriggerService>> {
        let config =
            ReconcilerConfig::new("arn:fn", "arn:role").with_retry(RetryPolicy::immediate(1));
        BatchProcessor::new(
            Reconciler::new(Arc::clone(service), config),
            Classifier::default(),
        )
    }

    #[tokio::test]
    async fn reports_failed_sequence_numbers() {
        let service = Arc::new(InMemoryTriggerService::new());
        service.fail_next(Operation::Create, "r2", TriggerServiceError::Timeout);

        let response = handle_payload(&processor(&service), EVENT.as_bytes(), None)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "batchItemFailures": [{ "itemIdentifier": "222" }] })
        );
        assert!(service.trigger("reservation-scheduler-group", "r1").is_some());
    }

    #[tokio::test]
    async fn rejects_non_batch_payload() {
        let service = Arc::new(InMemoryTriggerService::new());
        let result = handle_payload(&processor(&service), b"not json", None).await;
        assert!(result.is_err());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn reads_event_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EVENT.as_bytes()).unwrap();

        let bytes = read_event(Some(file.path())).await.unwrap();
        assert_eq!(bytes, EVENT.as_bytes());
    }

    #[tokio::test]
    async fn missing_file_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_event(Some(&dir.path().join("absent.json"))).await;
        assert!(result.is_err());
    }
}
