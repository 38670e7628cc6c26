//! Entry point wiring for the reservation controller.
//!
//! Loads configuration, builds the batch processor around the HTTP trigger
//! service, and feeds it batches from the function runtime or a file.

pub mod config;
pub mod error;
pub mod handler;
pub mod runtime;
