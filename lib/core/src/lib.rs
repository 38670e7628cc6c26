//! Core domain types and utilities for timeslot.
//!
//! This crate provides the identifiers and error plumbing shared by the
//! change-feed classifier, the trigger service client and the reconciler.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{BatchId, KeyError, ParseIdError, ReservationKey};
