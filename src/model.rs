// src/model.rs
//
// Alarm update types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zone reserved for station service up/down events.
pub const SERVICES_ZONE: &str = "services";

/// Alarm severity. Ordered so that an escalation compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    Warning,
    Emergency,
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmLevel::Warning => write!(f, "warning"),
            AlarmLevel::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    On,
    Off,
}

/// Which producer of a zone reported an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Climate,
    Tracking,
}

/// A single alarm state report from a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmUpdate {
    /// Unique within a zone
    pub identification: String,
    pub level: AlarmLevel,
    pub status: AlarmStatus,
    pub time: DateTime<Utc>,
    /// Empty when the station sent none
    #[serde(default)]
    pub description: String,
}

impl AlarmUpdate {
    pub fn new(
        identification: impl Into<String>,
        level: AlarmLevel,
        status: AlarmStatus,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            identification: identification.into(),
            level,
            status,
            time,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_on(&self) -> bool {
        self.status == AlarmStatus::On
    }
}

/// An [`AlarmUpdate`] qualified by the zone it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonedAlarmUpdate {
    pub zone: String,
    pub update: AlarmUpdate,
}

impl ZonedAlarmUpdate {
    pub fn new(zone: impl Into<String>, update: AlarmUpdate) -> Self {
        Self {
            zone: zone.into(),
            update,
        }
    }

    /// Service up/down event, routed by the non-graceful notification setting.
    pub fn service(update: AlarmUpdate) -> Self {
        Self::new(SERVICES_ZONE, update)
    }

    /// `zone/identification`, unique across the whole system.
    pub fn composite_id(&self) -> String {
        composite_id(&self.zone, &self.update.identification)
    }
}

pub fn composite_id(zone: &str, identification: &str) -> String {
    format!("{}/{}", zone, identification)
}

/// Input of the update filter: either an update or a zone teardown.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterInput {
    Update(ZonedAlarmUpdate),
    ClearZone(String),
}

impl From<ZonedAlarmUpdate> for FilterInput {
    fn from(update: ZonedAlarmUpdate) -> Self {
        FilterInput::Update(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AlarmLevel::Emergency > AlarmLevel::Warning);
    }

    #[test]
    fn test_composite_id() {
        let update = ZonedAlarmUpdate::new(
            "barn-1",
            AlarmUpdate::new("temp-high", AlarmLevel::Warning, AlarmStatus::On, Utc::now()),
        );
        assert_eq!(update.composite_id(), "barn-1/temp-high");
        assert_eq!(ZonedAlarmUpdate::service(update.update).zone, SERVICES_ZONE);
    }

    #[test]
    fn test_update_deserializes_without_description() {
        let json = r#"{"identification":"fan-3","level":"emergency","status":"on","time":"2024-05-01T10:00:00Z"}"#;
        let update: AlarmUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.level, AlarmLevel::Emergency);
        assert!(update.is_on());
        assert!(update.description.is_empty());
    }
}
