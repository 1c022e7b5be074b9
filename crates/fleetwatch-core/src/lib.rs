// fleetwatch-core: alert state engine, persistence seam, and notification
// fan-out for device telemetry.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod thresholds;

pub use config::ServiceConfig;
pub use engine::AlertEngine;
pub use error::CoreError;
pub use model::{
    ActiveAlertState, AlertEvent, AlertEventKind, AlertKey, Device, Direction, NewAlert,
    NumericRule, PersistedAlert, Severity, Telemetry, ThresholdRule, TriggerRule,
};
pub use notify::{Channel, DispatchReport, NotificationConfig, NotificationDispatcher};
pub use pipeline::{AlertOutcome, AlertPipeline};
pub use service::TelemetryService;
pub use store::{AlertStore, MemoryAlertStore, StoreError};
pub use thresholds::{ThresholdMap, ThresholdTable};
