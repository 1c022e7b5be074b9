use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{AlertStore, StoreError};
use crate::model::{AlertKey, Device, NewAlert, PersistedAlert};

/// In-process `AlertStore`: at most one open alert per key.
#[derive(Default)]
pub struct MemoryAlertStore {
    devices: DashMap<String, Device>,
    alerts: DashMap<String, PersistedAlert>,
    open: DashMap<AlertKey, String>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let store = Self::new();
        for device in devices {
            store.insert_device(device);
        }
        store
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Every record ever written, oldest first.
    pub fn alerts(&self) -> Vec<PersistedAlert> {
        let mut alerts: Vec<_> = self.alerts.iter().map(|r| r.value().clone()).collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// The open record for a key, if any.
    pub fn open_alert(&self, device_id: &str, sensor_type: &str) -> Option<PersistedAlert> {
        let id = self.open.get(&AlertKey::new(device_id, sensor_type))?;
        self.alerts.get(id.value()).map(|r| r.value().clone())
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.get(device_id).map(|r| r.value().clone()))
    }

    async fn create_or_update_alert(&self, alert: NewAlert) -> Result<PersistedAlert, StoreError> {
        let now = Utc::now();
        let key = AlertKey::new(alert.device_id.as_str(), alert.sensor_type.as_str());

        match self.open.entry(key) {
            Entry::Occupied(entry) => {
                let mut record = self
                    .alerts
                    .get_mut(entry.get())
                    .ok_or_else(|| StoreError::Rejected(format!("dangling alert id {}", entry.get())))?;
                record.value = alert.value;
                record.threshold_value = alert.threshold_value;
                record.message = alert.message;
                record.severity = alert.severity;
                record.updated_at = now;
                Ok(record.clone())
            }
            Entry::Vacant(entry) => {
                let record = PersistedAlert {
                    id: Uuid::new_v4().to_string(),
                    device_id: alert.device_id,
                    sensor_type: alert.sensor_type,
                    value: alert.value,
                    threshold_value: alert.threshold_value,
                    message: alert.message,
                    severity: alert.severity,
                    created_at: now,
                    updated_at: now,
                    acknowledged: false,
                    resolved: false,
                    resolved_at: None,
                };
                entry.insert(record.id.clone());
                self.alerts.insert(record.id.clone(), record.clone());
                Ok(record)
            }
        }
    }

    async fn resolve_alert(
        &self,
        device_id: &str,
        sensor_type: &str,
    ) -> Result<Option<PersistedAlert>, StoreError> {
        let Some((_, id)) = self.open.remove(&AlertKey::new(device_id, sensor_type)) else {
            return Ok(None);
        };
        let Some(mut record) = self.alerts.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        record.resolved = true;
        record.resolved_at = Some(now);
        record.updated_at = now;
        Ok(Some(record.clone()))
    }
}
