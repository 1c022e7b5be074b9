// ── Alert persistence ──
//
// The pipeline records alert transitions through `AlertStore`. The
// durable backend lives outside this crate; `MemoryAlertStore` serves
// the binary and tests.

mod memory;

pub use memory::MemoryAlertStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Device, NewAlert, PersistedAlert};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("alert store unavailable: {0}")]
    Unavailable(String),

    #[error("alert store rejected the record: {0}")]
    Rejected(String),
}

/// Persistence collaborator for devices and alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Look up a device; `None` when unknown.
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    /// Upsert the single open alert for `(device_id, sensor_type)`.
    async fn create_or_update_alert(&self, alert: NewAlert) -> Result<PersistedAlert, StoreError>;

    /// Mark the open alert for the key resolved; `None` when nothing was open.
    async fn resolve_alert(
        &self,
        device_id: &str,
        sensor_type: &str,
    ) -> Result<Option<PersistedAlert>, StoreError>;
}
