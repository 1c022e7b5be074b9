// ── Core error types ──
//
// Fatal conditions (the broker could not be reached) propagate to the
// owning process. Per-message failures are contained by the pipeline and
// only ever surface in logs and `AlertOutcome`s.

use thiserror::Error;

use crate::model::DecodeError;
use crate::notify::NotificationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport ────────────────────────────────────────────────────
    #[error("Cannot connect to broker at {broker}: {reason}")]
    ConnectionFailed { broker: String, reason: String },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Broker request failed: {message}")]
    Transport { message: String },

    // ── Per-message failures ─────────────────────────────────────────
    #[error("Failed to persist alert: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("Notification failed: {0}")]
    NotificationFailure(#[from] NotificationError),

    #[error("Malformed telemetry: {0}")]
    DecodeFailure(#[from] DecodeError),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if the owning process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Config { .. })
    }
}

impl From<fleetwatch_transport::Error> for CoreError {
    fn from(err: fleetwatch_transport::Error) -> Self {
        use fleetwatch_transport::Error as E;

        match err {
            E::ConnectionFailed {
                broker,
                attempts,
                reason,
            } => Self::ConnectionFailed {
                broker,
                reason: format!("{reason} (after {attempts} attempts)"),
            },
            E::NotConnected => Self::NotConnected,
            E::InvalidQos(_) | E::InvalidTopicFilter { .. } => Self::Config {
                message: err.to_string(),
            },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}
