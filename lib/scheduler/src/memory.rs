//! In-memory trigger service.
//!
//! Behaves like the real service for the four operations the reconciler uses,
//! records every call in order, and can be told to fail specific calls.

use crate::error::TriggerServiceError;
use crate::schedule::FireTime;
use crate::service::TriggerService;
use crate::trigger::TriggerSpec;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use timeslot_core::ReservationKey;

/// A trigger service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Get,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Get => "get",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded call, including calls that were made to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCall {
    Create { name: String, fire_at: FireTime },
    Update { name: String, fire_at: FireTime },
    Delete { name: String },
    Get { name: String },
}

impl TriggerCall {
    /// The trigger name this call addressed.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. }
            | Self::Update { name, .. }
            | Self::Delete { name }
            | Self::Get { name } => name,
        }
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Create { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
            Self::Get { .. } => Operation::Get,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by (group, name).
    triggers: BTreeMap<(String, String), TriggerSpec>,
    calls: Vec<TriggerCall>,
    failures: HashMap<(Operation, String), VecDeque<TriggerServiceError>>,
}

impl State {
    fn take_failure(&mut self, operation: Operation, name: &str) -> Option<TriggerServiceError> {
        self.failures
            .get_mut(&(operation, name.to_string()))
            .and_then(VecDeque::pop_front)
    }
}

/// A trigger service that keeps triggers in a map.
#[derive(Debug, Default)]
pub struct InMemoryTriggerService {
    state: Mutex<State>,
    atomic_update: bool,
}

impl InMemoryTriggerService {
    /// Creates an empty service without atomic update support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the atomic `update` operation.
    #[must_use]
    pub fn with_atomic_update(mut self, enabled: bool) -> Self {
        self.atomic_update = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a trigger directly, bypassing the call log.
    pub fn insert(&self, spec: TriggerSpec) {
        self.lock().triggers.insert(
            (spec.group_name.clone(), spec.name.as_str().to_string()),
            spec,
        );
    }

    /// Returns the stored trigger, if any.
    #[must_use]
    pub fn trigger(&self, group_name: &str, name: &str) -> Option<TriggerSpec> {
        self.lock()
            .triggers
            .get(&(group_name.to_string(), name.to_string()))
            .cloned()
    }

    /// Returns all stored triggers ordered by group and name.
    #[must_use]
    pub fn triggers(&self) -> Vec<TriggerSpec> {
        self.lock().triggers.values().cloned().collect()
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TriggerCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes the next `operation` on `name` fail with `error`.
    ///
    /// Queued failures for the same call are consumed in order.
    pub fn fail_next(&self, operation: Operation, name: &str, error: TriggerServiceError) {
        self.lock()
            .failures
            .entry((operation, name.to_string()))
            .or_default()
            .push_back(error);
    }
}

#[async_trait]
impl TriggerService for InMemoryTriggerService {
    async fn create(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        let mut state = self.lock();
        let name = spec.name.as_str().to_string();
        state.calls.push(TriggerCall::Create {
            name: name.clone(),
            fire_at: spec.fire_at,
        });
        if let Some(error) = state.take_failure(Operation::Create, &name) {
            return Err(error);
        }

        let slot = (spec.group_name.clone(), name.clone());
        if state.triggers.contains_key(&slot) {
            return Err(TriggerServiceError::Conflict { name });
        }
        state.triggers.insert(slot, spec.clone());
        Ok(())
    }

    async fn update(&self, spec: &TriggerSpec) -> Result<(), TriggerServiceError> {
        if !self.atomic_update {
            return Err(TriggerServiceError::Unsupported { operation: "update" });
        }

        let mut state = self.lock();
        let name = spec.name.as_str().to_string();
        state.calls.push(TriggerCall::Update {
            name: name.clone(),
            fire_at: spec.fire_at,
        });
        if let Some(error) = state.take_failure(Operation::Update, &name) {
            return Err(error);
        }

        match state.triggers.get_mut(&(spec.group_name.clone(), name.clone())) {
            Some(existing) => {
                *existing = spec.clone();
                Ok(())
            }
            None => Err(TriggerServiceError::NotFound { name }),
        }
    }

    fn supports_update(&self) -> bool {
        self.atomic_update
    }

    async fn delete(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<(), TriggerServiceError> {
        let mut state = self.lock();
        let name = name.as_str().to_string();
        state.calls.push(TriggerCall::Delete { name: name.clone() });
        if let Some(error) = state.take_failure(Operation::Delete, &name) {
            return Err(error);
        }

        match state.triggers.remove(&(group_name.to_string(), name.clone())) {
            Some(_) => Ok(()),
            None => Err(TriggerServiceError::NotFound { name }),
        }
    }

    async fn get(
        &self,
        name: &ReservationKey,
        group_name: &str,
    ) -> Result<Option<TriggerSpec>, TriggerServiceError> {
        let mut state = self.lock();
        let name = name.as_str().to_string();
        state.calls.push(TriggerCall::Get { name: name.clone() });
        if let Some(error) = state.take_failure(Operation::Get, &name) {
            return Err(error);
        }

        Ok(state.triggers.get(&(group_name.to_string(), name)).cloned())
    }
}
