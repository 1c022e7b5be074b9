// ── Alert pipeline ──
//
// telemetry -> engine -> store -> notifier. Evaluation and persistence of
// one (device, sensor) key run under that key's lock, so the store sees
// transitions in the order the engine produced them. Every failure past
// the engine is logged and contained; the engine's in-memory state is not
// rolled back when the store rejects a record.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use fleetwatch_transport::Payload;

use crate::engine::AlertEngine;
use crate::error::CoreError;
use crate::model::{AlertEvent, AlertKey, Device, NewAlert, PersistedAlert, Telemetry};
use crate::notify::{DispatchReport, NotificationDispatcher};
use crate::store::AlertStore;

/// What happened to one alert transition.
#[derive(Debug)]
pub struct AlertOutcome {
    pub event: AlertEvent,
    /// `None` when the store failed or had no open record to resolve.
    pub persisted: Option<PersistedAlert>,
    /// `None` when nothing was dispatched (resolved or not persisted).
    pub notifications: Option<DispatchReport>,
}

pub struct AlertPipeline {
    engine: Arc<AlertEngine>,
    store: Arc<dyn AlertStore>,
    notifier: Arc<NotificationDispatcher>,
    key_locks: DashMap<AlertKey, Arc<Mutex<()>>>,
}

impl AlertPipeline {
    pub fn new(
        engine: Arc<AlertEngine>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            engine,
            store,
            notifier,
            key_locks: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    /// Decode a raw payload and process it. Malformed payloads are logged
    /// and produce no outcomes.
    pub async fn process_payload(&self, device_id: &str, payload: &Payload) -> Vec<AlertOutcome> {
        match Telemetry::from_payload(payload, Utc::now()) {
            Ok(telemetry) => self.process_telemetry(device_id, &telemetry).await,
            Err(e) => {
                let err = CoreError::from(e);
                warn!(device_id, error = %err, "dropping telemetry");
                Vec::new()
            }
        }
    }

    /// Evaluate every reading for a known device.
    pub async fn process_telemetry(&self, device_id: &str, telemetry: &Telemetry) -> Vec<AlertOutcome> {
        let device = match self.store.get_device(device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!(device_id, "telemetry from unknown device ignored");
                return Vec::new();
            }
            Err(e) => {
                warn!(device_id, error = %CoreError::from(e), "device lookup failed");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        for (sensor_type, value) in &telemetry.readings {
            let lock = self.key_lock(AlertKey::new(device.id.as_str(), sensor_type.as_str()));
            let guard = lock.lock().await;

            let Some(event) = self.engine.evaluate(&device, sensor_type, value, telemetry.timestamp) else {
                continue;
            };
            let persisted = self.persist(&device, &event).await;
            drop(guard);

            let notifications = match &persisted {
                Some(record) if !event.is_resolved() => Some(self.notifier.dispatch(&event, record).await),
                _ => None,
            };
            outcomes.push(AlertOutcome {
                event,
                persisted,
                notifications,
            });
        }
        outcomes
    }

    fn key_lock(&self, key: AlertKey) -> Arc<Mutex<()>> {
        self.key_locks.entry(key).or_default().clone()
    }

    async fn persist(&self, device: &Device, event: &AlertEvent) -> Option<PersistedAlert> {
        let persisted = if event.is_resolved() {
            self.store
                .resolve_alert(&event.device_id, &event.sensor_type)
                .await
        } else {
            self.store
                .create_or_update_alert(NewAlert::from(event))
                .await
                .map(Some)
        };

        match persisted {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    device_id = %device.id,
                    sensor_type = %event.sensor_type,
                    kind = %event.kind,
                    error = %CoreError::from(e),
                    "alert not persisted; in-memory state kept"
                );
                None
            }
        }
    }
}
