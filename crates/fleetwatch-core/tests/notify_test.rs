// Delivery tests for `NotificationDispatcher` using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetwatch_core::{
    AlertEngine, AlertEvent, AlertEventKind, AlertPipeline, Channel, Device, MemoryAlertStore,
    NotificationConfig, NotificationDispatcher, PersistedAlert, Severity, ThresholdTable,
};
use fleetwatch_transport::Payload;

// ── Helpers ─────────────────────────────────────────────────────────

fn config(server: &MockServer) -> NotificationConfig {
    let uri = server.uri();
    NotificationConfig::default()
        .with_endpoint(Channel::Push, format!("{uri}/push"))
        .with_endpoint(Channel::Email, format!("{uri}/email"))
        .with_endpoint(Channel::Sms, format!("{uri}/sms"))
        .with_endpoint(Channel::Webhook, format!("{uri}/webhook"))
}

async fn expect_post(server: &MockServer, route: &str, status: u16, times: u64) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .expect(times)
        .mount(server)
        .await;
}

fn alert(kind: AlertEventKind, severity: Severity) -> (AlertEvent, PersistedAlert) {
    let ts = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
    let message = format!("{}: Temperature on Pump-7 is 95", severity.tag());
    let resolved = kind == AlertEventKind::Resolved;

    let event = AlertEvent {
        kind,
        device_id: "dev-1".into(),
        device_name: "Pump-7".into(),
        sensor_type: "temperature".into(),
        value: json!(95),
        threshold_value: json!(90),
        severity,
        message: message.clone(),
        timestamp: ts,
        resolved_at: resolved.then_some(ts),
    };
    let record = PersistedAlert {
        id: "alert-1".into(),
        device_id: "dev-1".into(),
        sensor_type: "temperature".into(),
        value: json!(95),
        threshold_value: json!(90),
        message,
        severity,
        created_at: ts,
        updated_at: ts,
        acknowledged: false,
        resolved,
        resolved_at: resolved.then_some(ts),
    };
    (event, record)
}

// ── Channel selection ───────────────────────────────────────────────

#[tokio::test]
async fn test_critical_alert_reaches_push_email_and_sms() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 1).await;
    expect_post(&server, "/email", 200, 1).await;
    expect_post(&server, "/sms", 200, 1).await;
    expect_post(&server, "/webhook", 200, 0).await;

    let dispatcher = NotificationDispatcher::new(config(&server)).unwrap();
    let (event, record) = alert(AlertEventKind::Opened, Severity::Critical);

    let mut report = dispatcher.dispatch(&event, &record).await;
    report.delivered.sort();

    assert_eq!(report.delivered, vec![Channel::Email, Channel::Sms, Channel::Push]);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_warning_alert_reaches_push_only() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 1).await;
    expect_post(&server, "/email", 200, 0).await;
    expect_post(&server, "/sms", 200, 0).await;

    let dispatcher = NotificationDispatcher::new(config(&server)).unwrap();
    let (event, record) = alert(AlertEventKind::Escalated, Severity::Warning);

    let report = dispatcher.dispatch(&event, &record).await;
    assert_eq!(report.delivered, vec![Channel::Push]);
}

#[tokio::test]
async fn test_resolved_alert_is_never_sent() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 0).await;
    expect_post(&server, "/email", 200, 0).await;
    expect_post(&server, "/sms", 200, 0).await;

    let dispatcher = NotificationDispatcher::new(config(&server)).unwrap();
    let (event, record) = alert(AlertEventKind::Resolved, Severity::Critical);

    let report = dispatcher.dispatch(&event, &record).await;
    assert!(report.suppressed);
    assert_eq!(report.attempted(), 0);
}

// ── Failure isolation ───────────────────────────────────────────────

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 1).await;
    expect_post(&server, "/email", 503, 1).await;
    expect_post(&server, "/sms", 200, 1).await;

    let dispatcher = NotificationDispatcher::new(config(&server)).unwrap();
    let (event, record) = alert(AlertEventKind::Opened, Severity::Critical);

    let report = dispatcher.dispatch(&event, &record).await;

    assert_eq!(report.delivered.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].to_string().contains("HTTP 503"));
}

#[tokio::test]
async fn test_slow_channel_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let dispatcher =
        NotificationDispatcher::new(config(&server).with_timeout(Duration::from_millis(100))).unwrap();
    let (event, record) = alert(AlertEventKind::Opened, Severity::Warning);

    let report = dispatcher.dispatch(&event, &record).await;
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].is_timeout());
}

#[tokio::test]
async fn test_unconfigured_channels_are_skipped() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 1).await;

    let config = NotificationConfig::default()
        .with_endpoint(Channel::Push, format!("{}/push", server.uri()));
    let dispatcher = NotificationDispatcher::new(config).unwrap();
    let (event, record) = alert(AlertEventKind::Opened, Severity::Critical);

    let mut report = dispatcher.dispatch(&event, &record).await;
    report.skipped.sort();

    assert_eq!(report.delivered, vec![Channel::Push]);
    assert_eq!(report.skipped, vec![Channel::Email, Channel::Sms]);
}

// ── Payload shape ───────────────────────────────────────────────────

#[tokio::test]
async fn test_payload_carries_alert_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .and(body_partial_json(json!({
            "alertId": "alert-1",
            "deviceId": "dev-1",
            "deviceName": "Pump-7",
            "severity": "warning",
            "timestamp": "2026-02-10T12:00:00Z",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(config(&server)).unwrap();
    let (event, record) = alert(AlertEventKind::Opened, Severity::Warning);

    let report = dispatcher.dispatch(&event, &record).await;
    assert_eq!(report.delivered, vec![Channel::Push]);
}

// ── End to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_notifies_on_breach_but_not_on_resolution() {
    let server = MockServer::start().await;
    expect_post(&server, "/push", 200, 1).await;
    expect_post(&server, "/email", 200, 1).await;
    expect_post(&server, "/sms", 200, 1).await;

    let engine = Arc::new(AlertEngine::new(Arc::new(ThresholdTable::default())));
    let store = Arc::new(MemoryAlertStore::with_devices([Device::new("dev-1", "Pump-7")]));
    let notifier = Arc::new(NotificationDispatcher::new(config(&server)).unwrap());
    let pipeline = AlertPipeline::new(engine, store, notifier);

    let hot = Payload::Json(json!({"readings": {"temperature": 95}}));
    let cool = Payload::Json(json!({"readings": {"temperature": 60}}));

    let opened = pipeline.process_payload("dev-1", &hot).await;
    assert_eq!(opened[0].notifications.as_ref().unwrap().delivered.len(), 3);

    let resolved = pipeline.process_payload("dev-1", &cool).await;
    assert!(resolved[0].event.is_resolved());
    assert!(resolved[0].notifications.is_none());
}
