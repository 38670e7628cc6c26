//! Partial batch acknowledgment.

use serde::{Deserialize, Serialize};

/// The function's answer to a batch: which records to redeliver.
///
/// An empty failure list acknowledges the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_identifier: String,
}

impl BatchResponse {
    /// Builds a response from the identifiers of failed records.
    pub fn from_failures<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_item_failures: identifiers
                .into_iter()
                .map(|id| ItemFailure {
                    item_identifier: id.into(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}
