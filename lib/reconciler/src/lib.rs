//! Reconciliation of scheduled triggers against reservation rows.
//!
//! This crate provides:
//!
//! - **Reconciler**: Idempotent create, reschedule and cancel of the trigger
//!   named after a row key
//! - **Retry policy**: Bounded exponential backoff and per-call timeouts for
//!   transient service failures
//! - **Batch processor**: Per-entry isolation, per-key ordering and deadline
//!   handling for one delivered batch

pub mod batch;
pub mod config;
pub mod error;
pub mod outcome;
pub mod reconciler;
pub mod retry;

pub use batch::{BatchProcessor, BatchReport, EntryReport};
pub use config::{PastFireTimePolicy, ReconcilerConfig};
pub use error::ReconcileError;
pub use outcome::{ReconciliationOutcome, SkipReason};
pub use reconciler::Reconciler;
pub use retry::RetryPolicy;
