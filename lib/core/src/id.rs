//! Identifier types shared across the workspace.
//!
//! `ReservationKey` is the row key of a reservation and, verbatim, the name of
//! the trigger registered for it. `BatchId` is a ULID used only to correlate
//! log lines of a single feed invocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Maximum length of a trigger name accepted by the scheduling service.
pub const MAX_KEY_LEN: usize = 64;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Error returned when a row key cannot be used as a trigger name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key is empty.
    Empty,
    /// The key exceeds [`MAX_KEY_LEN`] characters.
    TooLong { len: usize },
    /// The key contains a character outside `[0-9A-Za-z_.-]`.
    InvalidCharacter { character: char },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "key is empty"),
            Self::TooLong { len } => {
                write!(f, "key is {len} characters, at most {MAX_KEY_LEN} allowed")
            }
            Self::InvalidCharacter { character } => {
                write!(f, "key contains invalid character {character:?}")
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// The identifying key of a reservation row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReservationKey(String);

impl ReservationKey {
    /// Validates a raw row key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, too long, or uses characters the
    /// scheduling service rejects in trigger names.
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeyError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }
        let len = raw.chars().count();
        if len > MAX_KEY_LEN {
            return Err(KeyError::TooLong { len });
        }
        if let Some(character) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(KeyError::InvalidCharacter { character });
        }
        Ok(Self(raw))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReservationKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReservationKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ReservationKey> for String {
    fn from(key: ReservationKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ReservationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for one batch delivered by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Ulid);

impl BatchId {
    const PREFIX: &'static str = "batch";

    /// Creates a new ID with a randomly generated ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for BatchId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both `batch_<ulid>` and a raw ULID
        let ulid_str = s.strip_prefix("batch_").unwrap_or(s);

        Ulid::from_str(ulid_str)
            .map(Self)
            .map_err(|e| ParseIdError {
                id_type: "BatchId",
                reason: e.to_string(),
            })
    }
}
