// ── Message payloads ──
//
// Inbound bytes are decoded as JSON when possible and fall back to text,
// so handlers always receive something. Outbound structured payloads are
// serialized to JSON text before they hit the wire.

use bytes::Bytes;
use rumqttc::QoS;
use serde::Serialize;

use crate::error::Error;

/// Decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Body that was not valid JSON, kept verbatim (lossy UTF-8).
    Text(String),
}

impl Payload {
    /// Decode raw bytes, preferring JSON.
    pub fn decode(raw: &[u8]) -> Self {
        match serde_json::from_slice(raw) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    /// Serialize any value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Encode for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Json(value) => Ok(serde_json::to_vec(value)?),
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A message delivered to registered handlers.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Concrete topic the message was published to.
    pub topic: String,
    pub payload: Payload,
    pub qos: u8,
    pub retain: bool,
}

impl IncomingMessage {
    pub(crate) fn from_publish(topic: String, raw: &Bytes, qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            payload: Payload::decode(raw),
            qos: qos_level(qos),
            retain,
        }
    }
}

/// Convert a numeric delivery guarantee into the wire enum.
pub fn qos_from_level(level: u8) -> Result<QoS, Error> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::InvalidQos(other)),
    }
}

pub(crate) fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_json_object() {
        let payload = Payload::decode(br#"{"readings":{"temperature":95}}"#);
        assert_eq!(payload, Payload::Json(json!({"readings": {"temperature": 95}})));
    }

    #[test]
    fn decode_falls_back_to_text() {
        let payload = Payload::decode(b"temperature=95");
        assert_eq!(payload, Payload::Text("temperature=95".into()));
        assert!(payload.as_json().is_none());
    }

    #[test]
    fn decode_keeps_invalid_utf8_as_lossy_text() {
        let payload = Payload::decode(&[0xff, b'o', b'k']);
        assert!(matches!(payload, Payload::Text(ref t) if t.ends_with("ok")));
    }

    #[test]
    fn json_payload_encodes_as_text() {
        let payload = Payload::json(&json!({"a": 1})).expect("serializable");
        assert_eq!(payload.to_bytes().expect("encodable"), br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn qos_levels_round_trip_and_reject_out_of_range() {
        for level in 0..=2 {
            assert_eq!(qos_level(qos_from_level(level).expect("valid level")), level);
        }
        assert!(matches!(qos_from_level(3), Err(Error::InvalidQos(3))));
    }
}
