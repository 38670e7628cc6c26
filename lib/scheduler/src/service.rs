//! The trigger service seam.
//!
//! The reconciler only ever talks to this trait; production wires in
//! [`HttpTriggerService`](crate::HttpTriggerService), tests wire in
//! [`InMemoryTriggerService`](crate::InMemoryTriggerService).

use crate::error::TriggerServiceError;
use crate::trigger::TriggerSpec;
use async_trait::async_trait;
use std::sync::Arc;
use timeslot_core::ReservationKey;

/// Create, move, inspect and cancel named one-shot triggers.
#[async_trait]
pub trait TriggerService: Send + Sync {
    /// Registers a new trigger.
    ///
    /// Returns `Conflict` if a trigger with the same name exists in the group.
    async fn create(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError>;

    /// Replaces an existing trigger's schedule and target in one call.
    ///
    /// Only meaningful when [`TriggerService::supports_update`] is true.
    /// Returns `NotFound` if no trigger with this name exists.
    async fn update(&self, _spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        Err(TriggerServiceError::Unsupported { operation: "update" })
    }

    /// Whether [`TriggerService::update`] is an atomic reschedule.
    fn supports_update(&self) -> bool {
        false
    }

    /// Removes a trigger. Returns `NotFound` if it does not exist.
    async fn delete(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<(), TriggerServiceError>;

    /// Looks up a trigger by name.
    async fn get(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<Option<TriggerSpec>, TriggerServiceError>;
}

#[async_trait]
impl<T: TriggerService + ?Sized> TriggerService for Arc<T> {
    async fn create(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        (**self).create(spec).await
    }

    async fn update(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        (**self).update(spec).await
    }

    fn supports_update(&self) -> bool {
        (**self).supports_update()
    }

    async fn delete(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<(), TriggerServiceError> {
        (**self).delete(name, group_name).await
    }

    async fn get(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<Option<TriggerSpec>, TriggerServiceError> {
        (**self).get(name, group_name).await
    }
}
