//! Per-event trigger reconciliation.
//!
//! Every operation is idempotent under redelivery of the same event:
//!
//! - **Created**: create the trigger; if it already exists with the same
//!   schedule that is success, otherwise it is rescheduled
//! - **Updated**: reschedule, atomically when the service supports it and as
//!   delete followed by create otherwise (the trigger is briefly absent)
//! - **Deleted**: delete the trigger; a missing trigger is success
//!
//! Per key the external state moves `Absent -> Present -> Present -> Absent`,
//! and deleting from `Absent` is a no-op.

use crate::config::{PastFireTimePolicy, ReconcilerConfig};
use crate::error::ReconcileError;
use crate::outcome::{ReconciliationOutcome, SkipReason};
use chrono::Utc;
use timeslot_core::ReservationKey;
use timeslot_scheduler::{FireTime, Operation, TriggerService, TriggerServiceError, TriggerSpec};
use timeslot_stream::ChangeEvent;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Result of a create that may have hit an existing trigger.
enum Created {
    /// The trigger now exists as requested.
    Done,
    /// A trigger with a different schedule is in the way.
    Conflicting(ReconcileError),
}

/// Applies change events to a [`TriggerService`].
#[derive(Debug)]
pub struct Reconciler<S> {
    service: S,
    config: ReconcilerConfig,
}

impl<S: TriggerService> Reconciler<S> {
    pub fn new(service: S, config: ReconcilerConfig) -> Self {
        Self { service, config }
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Dispatches a classified event to the matching operation.
    pub async fn reconcile(&self, event: &ChangeEvent) -> ReconciliationOutcome {
        self.reconcile_before(event, None).await
    }

    /// Like [`Reconciler::reconcile`], but no service call runs past `cutoff`.
    ///
    /// Work cut short is `Failed(DeadlineExceeded)`; every operation is
    /// idempotent, so redelivery picks up where it stopped.
    pub async fn reconcile_before(
        &self,
        event: &ChangeEvent,
        cutoff: Option<Instant>,
    ) -> ReconciliationOutcome {
        match event {
            ChangeEvent::Created { key, fire_at } => self.created(key, *fire_at, cutoff).await,
            ChangeEvent::Updated { key, fire_at } => self.updated(key, *fire_at, cutoff).await,
            ChangeEvent::Deleted { key } => self.deleted(key, cutoff).await,
        }
    }

    pub async fn on_created(&self, key: &ReservationKey, fire_at: FireTime) -> ReconciliationOutcome {
        self.created(key, fire_at, None).await
    }

    pub async fn on_updated(&self, key: &ReservationKey, fire_at: FireTime) -> ReconciliationOutcome {
        self.updated(key, fire_at, None).await
    }

    pub async fn on_deleted(&self, key: &ReservationKey) -> ReconciliationOutcome {
        self.deleted(key, None).await
    }

    #[instrument(skip(self, fire_at, cutoff), fields(key = %key, kind = "created", fire_at = %fire_at))]
    async fn created(
        &self,
        key: &ReservationKey,
        fire_at: FireTime,
        cutoff: Option<Instant>,
    ) -> ReconciliationOutcome {
        if self.skips(fire_at) {
            return ReconciliationOutcome::Skipped(SkipReason::PastFireTime { fire_at });
        }

        let spec = self.spec_for(key, fire_at);
        let result = match self.create_checked(&spec, cutoff).await {
            Ok(Created::Done) => Ok(()),
            Ok(Created::Conflicting(_)) => {
                debug!("Trigger exists with a different schedule, rescheduling");
                self.reschedule(&spec, cutoff).await
            }
            Err(err) => Err(err),
        };
        finish(result)
    }

    #[instrument(skip(self, fire_at, cutoff), fields(key = %key, kind = "updated", fire_at = %fire_at))]
    async fn updated(
        &self,
        key: &ReservationKey,
        fire_at: FireTime,
        cutoff: Option<Instant>,
    ) -> ReconciliationOutcome {
        if self.skips(fire_at) {
            debug!("Fire time has passed, removing stale trigger");
            return finish(self.delete_tolerant(key, cutoff).await);
        }

        let spec = self.spec_for(key, fire_at);
        finish(self.reschedule(&spec, cutoff).await)
    }

    #[instrument(skip(self, cutoff), fields(key = %key, kind = "deleted"))]
    async fn deleted(&self, key: &ReservationKey, cutoff: Option<Instant>) -> ReconciliationOutcome {
        finish(self.delete_tolerant(key, cutoff).await)
    }

    fn skips(&self, fire_at: FireTime) -> bool {
        self.config.past_fire_time == PastFireTimePolicy::Skip && fire_at.is_past(Utc::now())
    }

    fn spec_for(&self, key: &ReservationKey, fire_at: FireTime) -> TriggerSpec {
        let spec = TriggerSpec::new(
            key.clone(),
            self.config.group_name.clone(),
            fire_at,
            self.config.target_for(key),
        );
        match &self.config.description {
            Some(description) => spec.with_description(description.clone()),
            None => spec,
        }
    }

    /// Moves an existing trigger to `spec`, creating it if absent.
    async fn reschedule(
        &self,
        spec: &TriggerSpec,
        cutoff: Option<Instant>,
    ) -> Result<(), ReconcileError> {
        if self.service.supports_update() {
            match self.update(spec, cutoff).await {
                Err(err) if is_not_found(&err) => {
                    debug!("No trigger to update, creating");
                }
                other => return other,
            }
        } else {
            self.delete_tolerant(&spec.name, cutoff).await?;
        }

        match self.create_checked(spec, cutoff).await? {
            Created::Done => Ok(()),
            // Another writer recreated it in between; redelivery settles it.
            Created::Conflicting(err) => Err(err),
        }
    }

    /// Creates `spec`, treating an identical existing trigger as success.
    async fn create_checked(
        &self,
        spec: &TriggerSpec,
        cutoff: Option<Instant>,
    ) -> Result<Created, ReconcileError> {
        let conflict = match self.create(spec, cutoff).await {
            Ok(()) => return Ok(Created::Done),
            Err(err) if is_conflict(&err) => err,
            Err(err) => return Err(err),
        };

        match self.get(&spec.name, cutoff).await? {
            Some(existing) if existing.same_schedule(spec) => {
                debug!("Identical trigger already exists");
                Ok(Created::Done)
            }
            Some(_) => Ok(Created::Conflicting(conflict)),
            None => {
                debug!("Conflicting trigger disappeared, creating again");
                self.create(spec, cutoff).await?;
                Ok(Created::Done)
            }
        }
    }

    async fn delete_tolerant(
        &self,
        key: &ReservationKey,
        cutoff: Option<Instant>,
    ) -> Result<(), ReconcileError> {
        match self.delete(key, cutoff).await {
            Err(err) if is_not_found(&err) => {
                debug!("Trigger already absent");
                Ok(())
            }
            other => other,
        }
    }

    async fn create(&self, spec: &TriggerSpec, cutoff: Option<Instant>) -> Result<(), ReconcileError> {
        let service = &self.service;
        self.config
            .retry
            .run_before(Operation::Create, cutoff, move || service.create(spec))
            .await
    }

    async fn update(&self, spec: &TriggerSpec, cutoff: Option<Instant>) -> Result<(), ReconcileError> {
        let service = &self.service;
        self.config
            .retry
            .run_before(Operation::Update, cutoff, move || service.update(spec))
            .await
    }

    async fn delete(&self, key: &ReservationKey, cutoff: Option<Instant>) -> Result<(), ReconcileError> {
        let service = &self.service;
        let group = self.config.group_name.as_str();
        self.config
            .retry
            .run_before(Operation::Delete, cutoff, move || service.delete(key, group))
            .await
    }

    async fn get(
        &self,
        key: &ReservationKey,
        cutoff: Option<Instant>,
    ) -> Result<Option<TriggerSpec>, ReconcileError> {
        let service = &self.service;
        let group = self.config.group_name.as_str();
        self.config
            .retry
            .run_before(Operation::Get, cutoff, move || service.get(key, group))
            .await
    }
}

fn finish(result: Result<(), ReconcileError>) -> ReconciliationOutcome {
    match result {
        Ok(()) => ReconciliationOutcome::Applied,
        Err(err) => ReconciliationOutcome::Failed(err),
    }
}

fn is_conflict(err: &ReconcileError) -> bool {
    matches!(err.service_error(), Some(TriggerServiceError::Conflict { .. }))
}

fn is_not_found(err: &ReconcileError) -> bool {
    matches!(err.service_error(), Some(TriggerServiceError::NotFound { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::sync::Arc;
    use timeslot_scheduler::{InMemoryTriggerService, TriggerCall, Tz};

    const GROUP: &str = "reservation-scheduler-group";

    fn key(raw: &str) -> ReservationKey {
        ReservationKey::parse(raw).unwrap()
    }

    fn at(raw: &str) -> FireTime {
        FireTime::parse(raw, Tz::UTC).unwrap()
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig::new(
            "arn:aws:lambda:us-east-1:1:function:execute",
            "arn:aws:iam::1:role/exec",
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    fn reconciler(service: &Arc<InMemoryTriggerService>) -> Reconciler<Arc<InMemoryTriggerService>> {
        Reconciler::new(Arc::clone(service), config())
    }

    fn operations(service: &InMemoryTriggerService) -> Vec<Operation> {
        service.calls().iter().map(TriggerCall::operation).collect()
    }

    #[tokio::test]
    async fn created_registers_trigger() {
        let service = Arc::new(InMemoryTriggerService::new());
        let outcome = reconciler(&service)
            .on_created(&key("r1"), at("2024-01-01T10:00:00"))
            .await;

        assert_eq!(outcome, ReconciliationOutcome::Applied);
        let stored = service.trigger(GROUP, "r1").unwrap();
        assert_eq!(stored.fire_at.expression(), "at(2024-01-01T10:00:00)");
        assert_eq!(stored.target.input, r#"{"reservationId":"r1"}"#);
        assert_eq!(operations(&service), vec![Operation::Create]);
    }

    #[tokio::test]
    async fn duplicate_create_with_same_schedule_is_applied() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = reconciler(&service);
        reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;
        service.clear_calls();

        let outcome = reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(operations(&service), vec![Operation::Create, Operation::Get]);
        assert_eq!(service.triggers().len(), 1);
    }

    #[tokio::test]
    async fn create_over_different_schedule_reschedules() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = reconciler(&service);
        reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;
        service.clear_calls();

        let outcome = reconciler.on_created(&key("r1"), at("2024-01-01T15:00:00")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(
            operations(&service),
            vec![
                Operation::Create,
                Operation::Get,
                Operation::Delete,
                Operation::Create
            ]
        );
        let stored = service.trigger(GROUP, "r1").unwrap();
        assert_eq!(stored.fire_at.expression(), "at(2024-01-01T15:00:00)");
    }

    #[tokio::test]
    async fn conflicting_trigger_that_vanishes_is_recreated() {
        let service = Arc::new(InMemoryTriggerService::new());
        service.fail_next(
            Operation::Create,
            "r1",
            TriggerServiceError::Conflict {
                name: "r1".to_string(),
            },
        );

        let outcome = reconciler(&service)
            .on_created(&key("r1"), at("2024-01-01T10:00:00"))
            .await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(
            operations(&service),
            vec![Operation::Create, Operation::Get, Operation::Create]
        );
        assert!(service.trigger(GROUP, "r1").is_some());
    }

    #[tokio::test]
    async fn updated_deletes_then_creates() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = reconciler(&service);
        reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;
        service.clear_calls();

        let outcome = reconciler.on_updated(&key("r1"), at("2024-01-01T11:30:00")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(operations(&service), vec![Operation::Delete, Operation::Create]);
        let stored = service.trigger(GROUP, "r1").unwrap();
        assert_eq!(stored.fire_at.expression(), "at(2024-01-01T11:30:00)");
    }

    #[tokio::test]
    async fn updated_without_existing_trigger_creates_it() {
        let service = Arc::new(InMemoryTriggerService::new());
        let outcome = reconciler(&service)
            .on_updated(&key("r9"), at("2024-01-01T11:30:00"))
            .await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert!(service.trigger(GROUP, "r9").is_some());
    }

    #[tokio::test]
    async fn updated_prefers_atomic_update() {
        let service = Arc::new(InMemoryTriggerService::new().with_atomic_update(true));
        let reconciler = reconciler(&service);
        reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;
        service.clear_calls();

        let outcome = reconciler.on_updated(&key("r1"), at("2024-01-01T11:30:00")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(operations(&service), vec![Operation::Update]);

        // Nothing to update: fall back to create
        service.clear_calls();
        reconciler.on_updated(&key("r2"), at("2024-01-01T12:00:00")).await;
        assert_eq!(operations(&service), vec![Operation::Update, Operation::Create]);
    }

    #[tokio::test]
    async fn deleted_tolerates_missing_trigger() {
        let service = Arc::new(InMemoryTriggerService::new());
        let outcome = reconciler(&service).on_deleted(&key("ghost")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(operations(&service), vec![Operation::Delete]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let service = Arc::new(InMemoryTriggerService::new());
        service.fail_next(Operation::Create, "r1", TriggerServiceError::Timeout);

        let outcome = reconciler(&service)
            .on_created(&key("r1"), at("2024-01-01T10:00:00"))
            .await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert_eq!(operations(&service), vec![Operation::Create, Operation::Create]);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let service = Arc::new(InMemoryTriggerService::new());
        let rejected = TriggerServiceError::Rejected {
            status: 400,
            message: "ValidationException: invalid target".to_string(),
        };
        service.fail_next(Operation::Create, "r1", rejected.clone());

        let outcome = reconciler(&service)
            .on_created(&key("r1"), at("2024-01-01T10:00:00"))
            .await;
        assert_eq!(
            outcome,
            ReconciliationOutcome::Failed(ReconcileError::Service {
                operation: Operation::Create,
                attempts: 1,
                source: rejected,
            })
        );
        assert_eq!(service.calls().len(), 1);
    }

    #[tokio::test]
    async fn skip_policy_ignores_past_creates() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = Reconciler::new(
            Arc::clone(&service),
            config().with_past_fire_time(PastFireTimePolicy::Skip),
        );

        let past = at("2000-01-01T00:00:00");
        assert_eq!(
            reconciler.on_created(&key("old"), past).await,
            ReconciliationOutcome::Skipped(SkipReason::PastFireTime { fire_at: past })
        );
        assert!(service.calls().is_empty());

        let future = at("2999-01-01T00:00:00");
        assert!(reconciler.on_created(&key("new"), future).await.is_applied());
    }

    #[tokio::test]
    async fn skip_policy_removes_stale_trigger_on_past_update() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = Reconciler::new(
            Arc::clone(&service),
            config().with_past_fire_time(PastFireTimePolicy::Skip),
        );
        reconciler.on_created(&key("r1"), at("2999-01-01T00:00:00")).await;

        let outcome = reconciler.on_updated(&key("r1"), at("2000-01-01T00:00:00")).await;
        assert_eq!(outcome, ReconciliationOutcome::Applied);
        assert!(service.trigger(GROUP, "r1").is_none());
    }

    #[tokio::test]
    async fn description_and_group_come_from_config() {
        let service = Arc::new(InMemoryTriggerService::new());
        let reconciler = Reconciler::new(
            Arc::clone(&service),
            config()
                .with_group_name("nightly")
                .with_description("reservation r1"),
        );
        reconciler.on_created(&key("r1"), at("2024-01-01T10:00:00")).await;

        let stored = service.trigger("nightly", "r1").unwrap();
        assert_eq!(stored.description.as_deref(), Some("reservation r1"));
        assert!(service.trigger(GROUP, "r1").is_none());
    }

    #[tokio::test]
    async fn nothing_runs_past_the_cutoff() {
        let service = Arc::new(InMemoryTriggerService::new());
        let event = ChangeEvent::Updated {
            key: key("r1"),
            fire_at: at("2024-01-01T11:30:00"),
        };

        let outcome = reconciler(&service)
            .reconcile_before(&event, Some(Instant::now()))
            .await;
        assert_eq!(
            outcome,
            ReconciliationOutcome::Failed(ReconcileError::DeadlineExceeded)
        );
        assert!(service.calls().is_empty());
    }
}
