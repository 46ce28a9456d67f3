//! Alarm projection over metadata records.
//!
//! An alarm is a metadata record of kind `alarm` carrying a fire time
//! (`time`, epoch milliseconds) and a variant (`type`).
//!
//! # Invariants
//! - Fire time `0` and `NO_ALARM` are sentinels meaning "nothing to arm".
//! - Fire times are never negative.

use crate::model::metadata::{
    AttributeValue, MetadataDraft, MetadataId, MetadataRecord, MetadataValidationError, TaskId,
};
use serde::{Deserialize, Serialize};

/// Metadata kind discriminator for alarms.
pub const ALARM_KIND: &str = "alarm";
/// Attribute holding the fire time in epoch milliseconds.
pub const ALARM_TIME_ATTR: &str = "time";
/// Attribute holding the alarm variant.
pub const ALARM_TYPE_ATTR: &str = "type";
/// Reserved "no alarm" fire time.
pub const NO_ALARM: i64 = i64::MAX;

/// Alarm flavor carried to the notification dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmVariant {
    /// Fires once at the given time.
    Single,
    /// Fires at the given time and is re-armed by the caller after delivery.
    Repeating,
}

impl AlarmVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Repeating => "repeating",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single" => Some(Self::Single),
            "repeating" => Some(Self::Repeating),
            _ => None,
        }
    }
}

/// Returns whether `fire_at_ms` is a "no alarm" sentinel.
pub fn is_no_alarm(fire_at_ms: i64) -> bool {
    fire_at_ms == 0 || fire_at_ms == NO_ALARM
}

/// Builds the desired metadata draft for one alarm.
///
/// # Errors
/// - `InvalidAttributeValue` when `fire_at_ms` is negative.
pub fn alarm_draft(
    fire_at_ms: i64,
    variant: AlarmVariant,
) -> Result<MetadataDraft, MetadataValidationError> {
    if fire_at_ms < 0 {
        return Err(MetadataValidationError::InvalidAttributeValue {
            name: ALARM_TIME_ATTR,
            message: format!("fire time must not be negative, got {fire_at_ms}"),
        });
    }

    Ok(MetadataDraft::new(ALARM_KIND)
        .with_attribute(ALARM_TIME_ATTR, fire_at_ms)
        .with_attribute(ALARM_TYPE_ATTR, variant.as_str()))
}

/// Persisted alarm decoded from its metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmRecord {
    pub id: MetadataId,
    pub task_id: TaskId,
    pub fire_at_ms: i64,
    pub variant: AlarmVariant,
}

impl AlarmRecord {
    /// Decodes an alarm from a persisted metadata row.
    ///
    /// A missing `type` attribute decodes as `Single`, matching rows written
    /// before variants existed.
    ///
    /// # Errors
    /// - `KindOutOfScope` when the row is not an alarm.
    /// - `MissingAttribute` / `InvalidAttributeValue` for malformed attributes.
    pub fn from_metadata(record: &MetadataRecord) -> Result<Self, MetadataValidationError> {
        if record.kind != ALARM_KIND {
            return Err(MetadataValidationError::KindOutOfScope {
                kind: record.kind.clone(),
                scope: ALARM_KIND.to_string(),
            });
        }

        let fire_at_ms = match record.attribute(ALARM_TIME_ATTR) {
            Some(AttributeValue::Integer(value)) if *value >= 0 => *value,
            Some(other) => {
                return Err(MetadataValidationError::InvalidAttributeValue {
                    name: ALARM_TIME_ATTR,
                    message: format!("expected non-negative integer, got {other:?}"),
                })
            }
            None => {
                return Err(MetadataValidationError::MissingAttribute {
                    kind: record.kind.clone(),
                    name: ALARM_TIME_ATTR,
                })
            }
        };

        let variant = match record.attribute(ALARM_TYPE_ATTR) {
            None => AlarmVariant::Single,
            Some(value) => value
                .as_text()
                .and_then(AlarmVariant::parse)
                .ok_or_else(|| MetadataValidationError::InvalidAttributeValue {
                    name: ALARM_TYPE_ATTR,
                    message: format!("unknown alarm variant {value:?}"),
                })?,
        };

        Ok(Self {
            id: record.id,
            task_id: record.task_id,
            fire_at_ms,
            variant,
        })
    }

    pub fn is_no_alarm(&self) -> bool {
        is_no_alarm(self.fire_at_ms)
    }
}
