//! Wire model of a change-feed batch.
//!
//! Mirrors the row store's stream record layout. Every field is optional so a
//! single incomplete record still deserializes and can be rejected on its own
//! instead of failing the whole batch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A row image or key set: attribute name to typed value.
pub type Item = HashMap<String, AttributeValue>;

/// A typed attribute value, e.g. `{"S": "r1"}` or `{"N": "42"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(String),
    SS(Vec<String>),
    NS(Vec<String>),
    BS(Vec<String>),
    M(HashMap<String, AttributeValue>),
    L(Vec<AttributeValue>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    /// Returns the string payload of an `S` value.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::SS(_) => "SS",
            Self::NS(_) => "NS",
            Self::BS(_) => "BS",
            Self::M(_) => "M",
            Self::L(_) => "L",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
        }
    }
}

/// One batch as delivered to the function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

impl StreamEvent {
    /// Parses a batch from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a stream batch.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A single change entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// `INSERT`, `MODIFY` or `REMOVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(
        rename = "eventSourceARN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_source_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamodb: Option<StreamPayload>,
}

impl StreamRecord {
    /// Identifier used when reporting this record as failed.
    ///
    /// The feed resumes from a sequence number, so that is preferred over
    /// the event id.
    #[must_use]
    pub fn item_identifier(&self) -> Option<&str> {
        self.dynamodb
            .as_ref()
            .and_then(|payload| payload.sequence_number.as_deref())
            .or(self.event_id.as_deref())
    }

    /// Key attributes of the changed row.
    #[must_use]
    pub fn keys(&self) -> Option<&Item> {
        self.dynamodb.as_ref().and_then(|p| p.keys.as_ref())
    }

    /// Row image after the change. Absent on removal.
    #[must_use]
    pub fn new_image(&self) -> Option<&Item> {
        self.dynamodb.as_ref().and_then(|p| p.new_image.as_ref())
    }
}

/// The row-store part of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    /// Seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_creation_date_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}
