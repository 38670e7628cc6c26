//! Client side of the one-shot trigger scheduling service.
//!
//! This crate provides:
//!
//! - **Fire times**: Parsing row timestamps and rendering `at(...)` expressions
//! - **Trigger specs**: Name, group, fire time and target of one trigger
//! - **Service seam**: The [`TriggerService`] trait with an HTTP adapter and
//!   an in-memory implementation

pub mod error;
pub mod http;
pub mod memory;
pub mod schedule;
pub mod service;
pub mod trigger;

pub use error::{ClientSetupError, ScheduleError, TriggerServiceError};
pub use http::{HttpSchedulerConfig, HttpTriggerService};
pub use memory::{InMemoryTriggerService, Operation, TriggerCall};
pub use schedule::{FireTime, parse_timezone};
pub use service::TriggerService;
pub use trigger::{ActionAfterCompletion, FlexibleWindow, TargetRef, TriggerSpec};

pub use chrono_tz::Tz;
