// ── Domain model ──

pub mod alert;
pub mod device;
pub mod telemetry;
pub mod threshold;

pub use alert::{
    ActiveAlertState, AlertEvent, AlertEventKind, AlertKey, NewAlert, PersistedAlert, Severity,
};
pub use device::Device;
pub use telemetry::{DecodeError, Telemetry};
pub use threshold::{Direction, NumericRule, ThresholdRule, TriggerRule};
