//! Controller error types.
//!
//! These only surface at process boundaries (startup, runtime API, event
//! input) and travel in `rootcause` reports.

use std::fmt;

#[derive(Debug)]
pub enum ControllerError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The trigger service client could not be built.
    Client { details: String },
    /// The function runtime API misbehaved or was unreachable.
    Runtime { details: String },
    /// The invocation payload is not a change-feed batch.
    InvalidEvent { details: String },
    /// Reading event input failed.
    Input { source: String, details: String },
    /// The response could not be written.
    Output { details: String },
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Client { details } => write!(f, "trigger service client: {details}"),
            Self::Runtime { details } => write!(f, "runtime API: {details}"),
            Self::InvalidEvent { details } => write!(f, "invalid event: {details}"),
            Self::Input { source, details } => write!(f, "failed to read {source}: {details}"),
            Self::Output { details } => write!(f, "failed to write response: {details}"),
        }
    }
}

impl std::error::Error for ControllerError {}
