//! Record classification.
//!
//! Maps the feed's change kinds onto reservation lifecycle events:
//!
//! | `eventName` | Event     | Key taken from | Fire time required |
//! |-------------|-----------|----------------|--------------------|
//! | `INSERT`    | `Created` | `NewImage`     | yes                |
//! | `MODIFY`    | `Updated` | `NewImage`     | yes                |
//! | `REMOVE`    | `Deleted` | `Keys`         | no                 |

use crate::error::ValidationError;
use crate::record::{Item, StreamRecord};
use std::fmt;
use timeslot_core::ReservationKey;
use timeslot_scheduler::{FireTime, Tz};

pub const DEFAULT_KEY_ATTRIBUTE: &str = "reservationId";
pub const DEFAULT_TIMESTAMP_ATTRIBUTE: &str = "executeTimestamp";

/// Lifecycle kind of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated change to one reservation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created { key: ReservationKey, fire_at: FireTime },
    Updated { key: ReservationKey, fire_at: FireTime },
    Deleted { key: ReservationKey },
}

impl ChangeEvent {
    #[must_use]
    pub fn key(&self) -> &ReservationKey {
        match self {
            Self::Created { key, .. } | Self::Updated { key, .. } | Self::Deleted { key } => key,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    #[must_use]
    pub const fn fire_at(&self) -> Option<FireTime> {
        match self {
            Self::Created { fire_at, .. } | Self::Updated { fire_at, .. } => Some(*fire_at),
            Self::Deleted { .. } => None,
        }
    }
}

/// Turns raw records into [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct Classifier {
    key_attribute: String,
    timestamp_attribute: String,
    default_timezone: Tz,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_ATTRIBUTE, DEFAULT_TIMESTAMP_ATTRIBUTE, Tz::UTC)
    }
}

impl Classifier {
    /// `default_timezone` applies to timestamps that carry no offset.
    pub fn new(
        key_attribute: impl Into<String>,
        timestamp_attribute: impl Into<String>,
        default_timezone: Tz,
    ) -> Self {
        Self {
            key_attribute: key_attribute.into(),
            timestamp_attribute: timestamp_attribute.into(),
            default_timezone,
        }
    }

    #[must_use]
    pub fn key_attribute(&self) -> &str {
        &self.key_attribute
    }

    #[must_use]
    pub fn timestamp_attribute(&self) -> &str {
        &self.timestamp_attribute
    }

    #[must_use]
    pub const fn default_timezone(&self) -> Tz {
        self.default_timezone
    }

    /// Validates one record.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the change kind is unknown or a
    /// required attribute is absent or malformed.
    pub fn classify(&self, record: &StreamRecord) -> Result<ChangeEvent, ValidationError> {
        let kind = match record.event_name.as_deref() {
            Some("INSERT") => ChangeKind::Created,
            Some("MODIFY") => ChangeKind::Updated,
            Some("REMOVE") => ChangeKind::Deleted,
            Some(other) => {
                return Err(ValidationError::UnsupportedKind {
                    kind: other.to_string(),
                });
            }
            None => return Err(ValidationError::missing("eventName")),
        };

        if kind == ChangeKind::Deleted {
            let keys = record
                .keys()
                .ok_or_else(|| ValidationError::missing("dynamodb.Keys"))?;
            let key = self.key_from(keys)?;
            return Ok(ChangeEvent::Deleted { key });
        }

        let image = record
            .new_image()
            .ok_or_else(|| ValidationError::missing("dynamodb.NewImage"))?;
        let key = self.key_from(image)?;
        let raw = string_attribute(image, &self.timestamp_attribute)?;
        let fire_at = FireTime::parse(raw, self.default_timezone)
            .map_err(|source| ValidationError::InvalidTimestamp { source })?;

        Ok(match kind {
            ChangeKind::Created => ChangeEvent::Created { key, fire_at },
            _ => ChangeEvent::Updated { key, fire_at },
        })
    }

    fn key_from(&self, item: &Item) -> Result<ReservationKey, ValidationError> {
        let raw = string_attribute(item, &self.key_attribute)?;
        ReservationKey::parse(raw).map_err(|source| ValidationError::InvalidKey { source })
    }
}

fn string_attribute<'a>(item: &'a Item, name: &str) -> Result<&'a str, ValidationError> {
    let value = item.get(name).ok_or_else(|| ValidationError::missing(name))?;
    value.as_s().ok_or_else(|| ValidationError::UnexpectedType {
        field: name.to_string(),
        found: value.type_tag(),
    })
}
