// ── Telemetry service ──
//
// Owns the broker connection and the alert pipeline. Telemetry handlers
// hold only a weak reference back to the service, so dropping the last
// `TelemetryService` tears everything down.

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use fleetwatch_transport::{
    ConnectionState, HandlerError, IncomingMessage, TopicFilter, TransportClient,
};

use crate::config::ServiceConfig;
use crate::error::CoreError;
use crate::model::telemetry::device_id_hint;
use crate::model::AlertEvent;
use crate::pipeline::AlertPipeline;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Connects telemetry intake to the alert pipeline.
///
/// Cheaply cloneable via `Arc<ServiceInner>`.
#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServiceConfig,
    transport: TransportClient,
    pipeline: Arc<AlertPipeline>,
    event_tx: broadcast::Sender<Arc<AlertEvent>>,
}

impl TelemetryService {
    /// Create the service. Does NOT connect -- call [`start()`](Self::start).
    pub fn new(config: ServiceConfig, transport: TransportClient, pipeline: Arc<AlertPipeline>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(ServiceInner {
                config,
                transport,
                pipeline,
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &TransportClient {
        &self.inner.transport
    }

    pub fn pipeline(&self) -> &Arc<AlertPipeline> {
        &self.inner.pipeline
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Register the telemetry handler, connect, and subscribe.
    ///
    /// An unreachable broker is fatal and returned as
    /// [`CoreError::ConnectionFailed`].
    pub async fn start(&self) -> Result<(), CoreError> {
        let topic = self.inner.config.telemetry_topic.clone();
        let filter = TopicFilter::new(topic.as_str())?;
        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);

        self.inner.transport.register_callback(&topic, move |message| {
            let weak = weak.clone();
            let filter = filter.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.handle_telemetry(&filter, message).await,
                    None => Ok(()),
                }
            }
        })?;

        if let Err(e) = self.connect_and_subscribe(&topic).await {
            self.inner.transport.unregister_callback(&topic);
            return Err(e);
        }

        info!(
            broker = %self.inner.transport.config().broker(),
            topic = %topic,
            "telemetry service started"
        );
        Ok(())
    }

    async fn connect_and_subscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.inner.transport.connect().await?;
        self.inner.transport.subscribe(topic, self.inner.config.qos).await?;
        Ok(())
    }

    /// Stop intake and close the broker session.
    pub async fn shutdown(&self) {
        self.inner
            .transport
            .unregister_callback(&self.inner.config.telemetry_topic);
        self.inner.transport.disconnect().await;
        info!("telemetry service stopped");
    }

    // ── Observation ──────────────────────────────────────────────

    /// Alert events as they are produced.
    pub fn events(&self) -> broadcast::Receiver<Arc<AlertEvent>> {
        self.inner.event_tx.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.connection_state()
    }
}

impl ServiceInner {
    async fn handle_telemetry(
        &self,
        filter: &TopicFilter,
        message: IncomingMessage,
    ) -> Result<(), HandlerError> {
        let device_id = filter
            .captures(&message.topic)
            .and_then(|levels| levels.first().map(|id| (*id).to_owned()))
            .or_else(|| device_id_hint(&message.payload).map(str::to_owned));

        let Some(device_id) = device_id else {
            warn!(topic = %message.topic, "telemetry without device id dropped");
            return Ok(());
        };

        let outcomes = self.pipeline.process_payload(&device_id, &message.payload).await;
        debug!(device_id, alerts = outcomes.len(), "telemetry processed");

        for outcome in outcomes {
            self.publish_alert(&outcome.event).await;
            // No receivers is fine.
            let _ = self.event_tx.send(Arc::new(outcome.event));
        }
        Ok(())
    }

    async fn publish_alert(&self, event: &AlertEvent) {
        let Some(topic) = self.config.alerts_topic_for(&event.device_id) else {
            return;
        };
        if let Err(e) = self
            .transport
            .publish_json(&topic, event, self.config.qos, false)
            .await
        {
            warn!(topic, error = %e, "failed to publish alert event");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use fleetwatch_transport::{ConnectPolicy, Payload, TransportConfig};

    use super::*;
    use crate::engine::AlertEngine;
    use crate::model::{AlertEventKind, Device};
    use crate::notify::{NotificationConfig, NotificationDispatcher};
    use crate::store::MemoryAlertStore;
    use crate::thresholds::ThresholdTable;

    fn service(transport: TransportConfig) -> TelemetryService {
        let engine = Arc::new(AlertEngine::new(Arc::new(ThresholdTable::default())));
        let store = Arc::new(MemoryAlertStore::with_devices([Device::new("pump-7", "Pump-7")]));
        let notifier = Arc::new(NotificationDispatcher::new(NotificationConfig::default()).unwrap());
        let pipeline = Arc::new(AlertPipeline::new(engine, store, notifier));
        TelemetryService::new(ServiceConfig::default(), TransportClient::new(transport), pipeline)
    }

    fn message(topic: &str, payload: serde_json::Value) -> IncomingMessage {
        IncomingMessage {
            topic: topic.into(),
            payload: Payload::Json(payload),
            qos: 1,
            retain: false,
        }
    }

    #[tokio::test]
    async fn start_against_unreachable_broker_is_fatal() {
        let service = service(TransportConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect: ConnectPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                poll_interval: Duration::from_millis(10),
                poll_attempts: 5,
            },
            ..TransportConfig::default()
        });

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }), "got {err:?}");
        assert!(err.is_fatal());
        assert!(service.transport().handler_patterns().is_empty());
    }

    #[tokio::test]
    async fn device_id_comes_from_topic_level() {
        let service = service(TransportConfig::default());
        let mut events = service.events();
        let filter = TopicFilter::new("devices/+/telemetry").unwrap();

        service
            .inner
            .handle_telemetry(
                &filter,
                message("devices/pump-7/telemetry", json!({"readings": {"temperature": 95}})),
            )
            .await
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.device_id, "pump-7");
        assert_eq!(event.kind, AlertEventKind::Opened);
    }

    #[tokio::test]
    async fn device_id_falls_back_to_payload_field() {
        let service = service(TransportConfig::default());
        let mut events = service.events();
        let filter = TopicFilter::new("telemetry/#").unwrap();

        service
            .inner
            .handle_telemetry(
                &filter,
                message(
                    "telemetry/all",
                    json!({"deviceId": "pump-7", "readings": {"battery": 3}}),
                ),
            )
            .await
            .unwrap();

        assert_eq!(events.try_recv().unwrap().sensor_type, "battery");
    }

    #[tokio::test]
    async fn unidentifiable_telemetry_is_dropped() {
        let service = service(TransportConfig::default());
        let mut events = service.events();
        let filter = TopicFilter::new("telemetry/#").unwrap();

        service
            .inner
            .handle_telemetry(&filter, message("telemetry/all", json!({"readings": {"temperature": 95}})))
            .await
            .unwrap();

        assert!(events.try_recv().is_err());
        assert_eq!(service.pipeline().engine().active_count(), 0);
    }
}
