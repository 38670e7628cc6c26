//! Bounded retry for trigger service calls.

use crate::error::ReconcileError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use timeslot_scheduler::{Operation, TriggerServiceError};
use tokio::time::Instant;
use tracing::warn;

/// How service calls are timed out and retried.
///
/// Transient errors (throttling, timeouts, server failures) are retried with
/// exponential backoff, doubling from `initial_backoff_ms` up to
/// `max_backoff_ms`. Anything else fails on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound on a single call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Runs `call` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Service`] carrying the last service error and
    /// the number of attempts made.
    pub async fn run<T, F, Fut>(&self, operation: Operation, call: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TriggerServiceError>>,
    {
        self.run_before(operation, None, call).await
    }

    /// Like [`RetryPolicy::run`], but no attempt runs past `cutoff`.
    ///
    /// An attempt still in flight at the cutoff is abandoned, and a retry
    /// whose backoff would end past the cutoff is not made.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::DeadlineExceeded`] when the cutoff stops an
    /// attempt, otherwise [`ReconcileError::Service`] as for `run`.
    pub async fn run_before<T, F, Fut>(
        &self,
        operation: Operation,
        cutoff: Option<Instant>,
        mut call: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TriggerServiceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            let now = Instant::now();
            let mut limit = now + self.call_timeout();
            if let Some(cutoff) = cutoff {
                if now >= cutoff {
                    return Err(ReconcileError::DeadlineExceeded);
                }
                limit = limit.min(cutoff);
            }

            attempts += 1;
            let result = match tokio::time::timeout_at(limit, call()).await {
                Ok(result) => result,
                Err(_) if cutoff == Some(limit) => return Err(ReconcileError::DeadlineExceeded),
                Err(_) => Err(TriggerServiceError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempts < max_attempts => {
                    let delay = self.backoff(attempts);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    if cutoff.is_some_and(|cutoff| Instant::now() + delay >= cutoff) {
                        warn!(
                            %operation,
                            attempt = attempts,
                            delay_ms,
                            error = %err,
                            "Transient trigger service error, no time left to retry"
                        );
                        return Err(ReconcileError::Service {
                            operation,
                            attempts,
                            source: err,
                        });
                    }
                    warn!(
                        %operation,
                        attempt = attempts,
                        max_attempts,
                        delay_ms,
                        error = %err,
                        "Transient trigger service error, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(source) => {
                    return Err(ReconcileError::Service {
                        operation,
                        attempts,
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.call_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(6), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::immediate(3)
            .run(Operation::Create, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TriggerServiceError::Throttled {
                        message: "slow down".to_string(),
                    })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run(Operation::Delete, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TriggerServiceError::Timeout)
            })
            .await;
        assert_eq!(
            result,
            Err(ReconcileError::Service {
                operation: Operation::Delete,
                attempts: 2,
                source: TriggerServiceError::Timeout,
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run(Operation::Create, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TriggerServiceError::Rejected {
                    status: 400,
                    message: "ValidationException: bad target".to_string(),
                })
            })
            .await;
        assert!(matches!(
            result,
            Err(ReconcileError::Service { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            call_timeout_ms: 50,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run(Operation::Get, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ReconcileError::Service {
                source: TriggerServiceError::Timeout,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_in_flight_stops_at_the_cutoff() {
        let started = Instant::now();
        let result: Result<(), _> = RetryPolicy::default()
            .run_before(
                Operation::Create,
                Some(started + Duration::from_secs(1)),
                || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
            )
            .await;
        assert_eq!(result, Err(ReconcileError::DeadlineExceeded));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_dropped_when_backoff_outlasts_the_cutoff() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            ..RetryPolicy::default()
        };
        let cutoff = Instant::now() + Duration::from_millis(500);
        let result: Result<(), _> = policy
            .run_before(Operation::Delete, Some(cutoff), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TriggerServiceError::Throttled {
                    message: "Rate exceeded".to_string(),
                })
            })
            .await;
        assert!(matches!(
            result,
            Err(ReconcileError::Service { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nothing_is_called_past_the_cutoff() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run_before(Operation::Get, Some(Instant::now()), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ReconcileError::DeadlineExceeded));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
