//! Change feed handling for reservation rows.
//!
//! This crate provides:
//!
//! - **Wire model**: Stream batches and records in the row store's typed
//!   attribute encoding
//! - **Classifier**: Turning one record into a validated lifecycle event
//! - **Acknowledgment**: The partial-batch response that tells the feed
//!   which records to redeliver

pub mod classify;
pub mod error;
pub mod record;
pub mod response;

pub use classify::{ChangeEvent, ChangeKind, Classifier};
pub use error::ValidationError;
pub use record::{AttributeValue, Item, StreamEvent, StreamPayload, StreamRecord};
pub use response::{BatchResponse, ItemFailure};
