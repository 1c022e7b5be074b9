use thiserror::Error;

/// Top-level error type for the `fleetwatch-transport` crate.
///
/// Connection failures are fatal for the client instance that produced
/// them; everything else is a caller error reported immediately.
/// `fleetwatch-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The broker never acknowledged a session within the retry budget.
    #[error("Failed to connect to broker {broker} after {attempts} attempts: {reason}")]
    ConnectionFailed {
        broker: String,
        attempts: u32,
        reason: String,
    },

    /// Operation attempted while no session is established.
    #[error("Not connected to broker")]
    NotConnected,

    // ── Requests ────────────────────────────────────────────────────
    /// Subscribe request rejected by the client.
    #[error("Failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },

    /// Publish request rejected by the client.
    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },

    // ── Validation ──────────────────────────────────────────────────
    /// QoS outside `0..=2`.
    #[error("Invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    /// Malformed topic filter (misplaced `#` or `+`).
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter { filter: String, reason: &'static str },

    // ── Data ────────────────────────────────────────────────────────
    /// Structured payload could not be encoded.
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the client instance is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Returns `true` if retrying after reconnecting could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Subscribe { .. } | Self::Publish { .. })
    }
}
