// ── Telemetry message decoding ──
//
// Wire shape: `{ "timestamp": "<ISO-8601>"?, "readings": { sensor: value } }`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use fleetwatch_transport::Payload;

/// Why a payload could not be read as telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not JSON")]
    NotJson,

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("`readings` must be an object of sensor values")]
    InvalidReadings,
}

/// A decoded telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub timestamp: DateTime<Utc>,
    pub readings: Map<String, Value>,
}

impl Telemetry {
    /// Decode a transport payload. A missing or unparseable timestamp
    /// falls back to `now`; a missing `readings` field is empty.
    pub fn from_payload(payload: &Payload, now: DateTime<Utc>) -> Result<Self, DecodeError> {
        match payload {
            Payload::Json(value) => Self::from_value(value, now),
            Payload::Text(_) => Err(DecodeError::NotJson),
        }
    }

    pub fn from_value(value: &Value, now: DateTime<Utc>) -> Result<Self, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(now);

        let readings = match object.get("readings") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(readings)) => readings.clone(),
            Some(_) => return Err(DecodeError::InvalidReadings),
        };

        Ok(Self {
            timestamp,
            readings,
        })
    }
}

/// Parse RFC 3339, or a naive ISO-8601 timestamp interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Device id carried inside the payload (`deviceId` or `device_id`).
pub fn device_id_hint(payload: &Payload) -> Option<&str> {
    let object = payload.as_json()?.as_object()?;
    object
        .get("deviceId")
        .or_else(|| object.get("device_id"))
        .and_then(Value::as_str)
}
