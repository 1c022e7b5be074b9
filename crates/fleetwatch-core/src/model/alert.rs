// ── Alert domain types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Ordered alert intensity: `Warning < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    /// Upper-case tag used at the front of alert messages.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// The transition an [`AlertEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertEventKind {
    Opened,
    Escalated,
    Resolved,
}

/// Identity of an alert: one device, one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub device_id: String,
    pub sensor_type: String,
}

impl AlertKey {
    pub fn new(device_id: impl Into<String>, sensor_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sensor_type: sensor_type.into(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.sensor_type)
    }
}

/// In-memory state of an open alert. Absence of an entry means normal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAlertState {
    pub severity: Severity,
    pub value: serde_json::Value,
    pub threshold_value: serde_json::Value,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Immutable record of a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub device_id: String,
    pub device_name: String,
    pub sensor_type: String,
    pub value: serde_json::Value,
    pub threshold_value: serde_json::Value,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.device_id.clone(), self.sensor_type.clone())
    }

    pub fn is_resolved(&self) -> bool {
        self.kind == AlertEventKind::Resolved
    }
}

/// Upsert request handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    pub device_id: String,
    pub sensor_type: String,
    pub value: serde_json::Value,
    pub threshold_value: serde_json::Value,
    pub message: String,
    pub severity: Severity,
}

impl From<&AlertEvent> for NewAlert {
    fn from(event: &AlertEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            sensor_type: event.sensor_type.clone(),
            value: event.value.clone(),
            threshold_value: event.threshold_value.clone(),
            message: event.message.clone(),
            severity: event.severity,
        }
    }
}

/// Durable alert record returned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAlert {
    pub id: String,
    pub device_id: String,
    pub sensor_type: String,
    pub value: serde_json::Value,
    pub threshold_value: serde_json::Value,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}
