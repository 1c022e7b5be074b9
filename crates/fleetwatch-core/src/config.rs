// ── Runtime service configuration ──
//
// Topic routing for `TelemetryService`. Built by the config crate or by
// hand; never touches disk.

/// Placeholder substituted with the device id in `alerts_topic`.
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Pattern telemetry arrives on. The first `+` level is the device id.
    pub telemetry_topic: String,
    /// Delivery guarantee for the subscription and alert publishes.
    pub qos: u8,
    /// Where alert events are re-published, if anywhere.
    pub alerts_topic: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            telemetry_topic: "devices/+/telemetry".into(),
            qos: 1,
            alerts_topic: Some(format!("devices/{DEVICE_ID_PLACEHOLDER}/alerts")),
        }
    }
}

impl ServiceConfig {
    /// Concrete alert topic for `device_id`.
    pub fn alerts_topic_for(&self, device_id: &str) -> Option<String> {
        self.alerts_topic
            .as_deref()
            .map(|template| template.replace(DEVICE_ID_PLACEHOLDER, device_id))
    }
}
