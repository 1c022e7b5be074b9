// ── Broker connection manager ──
//
// One logical MQTT session per `TransportClient`. The network loop runs on
// its own task; every inbound publish is fanned out to each matching
// handler as an independently spawned task, so a slow or failing handler
// never stalls the read loop or its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{calculate_backoff, ConnectPolicy, ReconnectConfig};
use crate::error::Error;
use crate::payload::{qos_from_level, qos_level, IncomingMessage, Payload};
use crate::topic::TopicFilter;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Error type handlers report back; logged by the dispatch task.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────

/// Broker login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// How to reach and stay connected to a broker.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect: ConnectPolicy,
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fleetwatch".into(),
            credentials: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            connect: ConnectPolicy::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TransportConfig {
    /// `host:port` for logs and errors.
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive.max(Duration::from_secs(1)))
            .set_clean_session(self.clean_session);
        if let Some(ref creds) = self.credentials {
            options.set_credentials(&creds.username, creds.password.expose_secret());
        }
        options
    }
}

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Outcome of a single session handshake, set by the network loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Handshake {
    Pending,
    Acknowledged,
    Failed(String),
}

// ── TransportClient ──────────────────────────────────────────────

/// Durable pub/sub connection with pattern-based message routing.
///
/// Cheaply cloneable via `Arc<Inner>`. The underlying session handle is
/// owned here and never handed out.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    handlers: DashMap<String, (TopicFilter, Handler)>,
    /// Active subscriptions, replayed when the broker drops our session.
    subscriptions: DashMap<String, QoS>,
    session: Mutex<Option<Session>>,
}

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransportClient {
    /// Create a client. Does NOT connect -- call [`connect()`](Self::connect).
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                handlers: DashMap::new(),
                subscriptions: DashMap::new(),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Establish the broker session.
    ///
    /// Each attempt starts a fresh network loop and polls for the broker's
    /// acknowledgment; a timed-out attempt is torn down before the next one.
    /// Attempt `n` is followed by a `base_delay * n` pause. Exhausting
    /// the policy yields [`Error::ConnectionFailed`].
    pub async fn connect(&self) -> Result<(), Error> {
        let mut slot = self.inner.session.lock().await;

        if slot.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            stale.teardown().await;
        }

        let config = &self.inner.config;
        let policy = &config.connect;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_reason = String::from("no acknowledgment from broker");
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            self.inner.set_state(ConnectionState::Connecting { attempt });
            debug!(broker = %config.broker(), attempt, "connecting to broker");

            let (session, handshake) = self.spawn_session();

            match await_handshake(handshake, policy).await {
                Ok(()) => {
                    *slot = Some(session);
                    info!(broker = %config.broker(), attempt, "connected to broker");
                    return Ok(());
                }
                Err(reason) => {
                    warn!(broker = %config.broker(), attempt, %reason, "connection attempt failed");
                    session.teardown().await;
                    last_reason = reason;
                }
            }

            if attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                debug!(delay_ms = delay.as_millis(), attempt, "waiting before next attempt");
                tokio::time::sleep(delay).await;
            }
        }

        self.inner.set_state(ConnectionState::Failed);
        Err(Error::ConnectionFailed {
            broker: config.broker(),
            attempts,
            reason: last_reason,
        })
    }

    /// Close the session and stop the network loop. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().await.take();

        if let Some(session) = session {
            if let Err(e) = session.client.disconnect().await {
                debug!(error = %e, "disconnect request not delivered");
                session.teardown().await;
            } else {
                session.close().await;
            }
            info!(broker = %self.inner.config.broker(), "disconnected from broker");
        }

        self.inner.subscriptions.clear();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Subscribe to a topic pattern with the given QoS (0, 1 or 2).
    pub async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), Error> {
        let client = self.connected_client().await?;
        let filter = TopicFilter::new(topic)?;
        let qos = qos_from_level(qos)?;

        client
            .subscribe(filter.as_str(), qos)
            .await
            .map_err(|source| Error::Subscribe {
                topic: topic.to_owned(),
                source,
            })?;

        self.inner.subscriptions.insert(filter.as_str().to_owned(), qos);
        info!(topic, qos = qos_level(qos), "subscribed");
        Ok(())
    }

    /// Publish a payload; structured payloads go out as JSON text.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &Payload,
        qos: u8,
        retain: bool,
    ) -> Result<(), Error> {
        let client = self.connected_client().await?;
        let qos = qos_from_level(qos)?;
        let bytes = payload.to_bytes()?;
        let size = bytes.len();

        client
            .publish(topic, qos, retain, bytes)
            .await
            .map_err(|source| Error::Publish {
                topic: topic.to_owned(),
                source,
            })?;

        debug!(topic, bytes = size, "published message");
        Ok(())
    }

    /// Serialize `value` as JSON and publish it.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        qos: u8,
        retain: bool,
    ) -> Result<(), Error> {
        let payload = Payload::json(&value)?;
        self.publish(topic, &payload, qos, retain).await
    }

    // ── Handler registration ─────────────────────────────────────

    /// Route messages whose topic matches `pattern` to `handler`.
    ///
    /// Registering the same pattern twice replaces the earlier handler.
    pub fn register_callback<F, Fut>(&self, pattern: &str, handler: F) -> Result<(), Error>
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let filter = TopicFilter::new(pattern)?;
        let handler: Handler = Arc::new(move |message| Box::pin(handler(message)));

        if self
            .inner
            .handlers
            .insert(pattern.to_owned(), (filter, handler))
            .is_some()
        {
            debug!(pattern, "replaced message handler");
        } else {
            debug!(pattern, "registered message handler");
        }
        Ok(())
    }

    /// Remove the handler for `pattern`. Returns `true` if one existed.
    pub fn unregister_callback(&self, pattern: &str) -> bool {
        let removed = self.inner.handlers.remove(pattern).is_some();
        if removed {
            debug!(pattern, "unregistered message handler");
        }
        removed
    }

    /// Patterns that currently have a handler.
    pub fn handler_patterns(&self) -> Vec<String> {
        self.inner.handlers.iter().map(|e| e.key().clone()).collect()
    }

    // ── State observation ────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.borrow() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────

    async fn connected_client(&self) -> Result<AsyncClient, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(Error::NotConnected)
    }

    fn spawn_session(&self) -> (Session, watch::Receiver<Handshake>) {
        let (client, eventloop) =
            AsyncClient::new(self.inner.config.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let (handshake_tx, handshake_rx) = watch::channel(Handshake::Pending);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(network_loop(
            eventloop,
            client.clone(),
            Arc::clone(&self.inner),
            handshake_tx,
            cancel.clone(),
        ));

        (
            Session {
                client,
                cancel,
                task,
            },
            handshake_rx,
        )
    }

    #[cfg(test)]
    pub(crate) fn dispatch(&self, message: IncomingMessage) -> usize {
        self.inner.dispatch(message)
    }
}

impl Session {
    /// Stop the network loop now.
    async fn teardown(mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(TEARDOWN_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }

    /// Give the loop a chance to flush a queued DISCONNECT, then stop it.
    async fn close(mut self) {
        if tokio::time::timeout(TEARDOWN_GRACE, &mut self.task).await.is_err() {
            self.cancel.cancel();
            self.task.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Spawn one task per handler whose pattern matches the topic.
    fn dispatch(&self, message: IncomingMessage) -> usize {
        let matching: Vec<(String, Handler)> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0.matches(&message.topic))
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().1)))
            .collect();

        if matching.is_empty() {
            trace!(topic = %message.topic, "no handler for topic");
            return 0;
        }

        let count = matching.len();
        for (pattern, handler) in matching {
            let message = message.clone();
            tokio::spawn(async move {
                let topic = message.topic.clone();
                if let Err(e) = handler(message).await {
                    warn!(%pattern, %topic, error = %e, "message handler failed");
                }
            });
        }
        count
    }

    /// Re-issue every recorded subscription on a fresh session.
    fn resubscribe(&self, client: &AsyncClient) {
        for entry in &self.subscriptions {
            if let Err(e) = client.try_subscribe(entry.key().as_str(), *entry.value()) {
                warn!(topic = %entry.key(), error = %e, "resubscribe failed");
            }
        }
    }
}

/// Poll the handshake flag a bounded number of times.
async fn await_handshake(
    mut handshake: watch::Receiver<Handshake>,
    policy: &ConnectPolicy,
) -> Result<(), String> {
    for _ in 0..policy.poll_attempts.max(1) {
        let current = handshake.borrow_and_update().clone();
        match current {
            Handshake::Acknowledged => return Ok(()),
            Handshake::Failed(reason) => return Err(reason),
            Handshake::Pending => {}
        }
        tokio::time::sleep(policy.poll_interval).await;
    }

    let last = handshake.borrow().clone();
    match last {
        Handshake::Acknowledged => Ok(()),
        Handshake::Failed(reason) => Err(reason),
        Handshake::Pending => Err(format!(
            "no acknowledgment within {}ms",
            policy.attempt_timeout().as_millis()
        )),
    }
}

// ── Background network loop ──────────────────────────────────────

/// Drive the session: handshake, then read → dispatch, reconnecting with
/// backoff whenever an established session drops.
async fn network_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    inner: Arc<Inner>,
    handshake: watch::Sender<Handshake>,
    cancel: CancellationToken,
) {
    let mut established = false;
    let mut failures: u32 = 0;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    let reason = format!("broker refused connection: {:?}", ack.code);
                    if !established {
                        handshake.send_replace(Handshake::Failed(reason));
                        break;
                    }
                    warn!(%reason, "reconnect refused");
                    continue;
                }

                if established {
                    info!(attempts = failures, "reconnected to broker");
                }
                if !ack.session_present {
                    inner.resubscribe(&client);
                }
                established = true;
                failures = 0;
                inner.set_state(ConnectionState::Connected);
                handshake.send_replace(Handshake::Acknowledged);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
                let message = IncomingMessage::from_publish(
                    publish.topic,
                    &publish.payload,
                    publish.qos,
                    publish.retain,
                );
                inner.dispatch(message);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, return_codes = ?ack.return_codes, "subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent, stopping network loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !established {
                    handshake.send_replace(Handshake::Failed(e.to_string()));
                    break;
                }

                let delay = calculate_backoff(failures, &inner.config.reconnect);
                failures = failures.saturating_add(1);
                inner.set_state(ConnectionState::Reconnecting { attempt: failures });
                warn!(
                    error = %e,
                    attempt = failures,
                    delay_ms = delay.as_millis(),
                    "broker connection lost, reconnecting"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!("network loop exiting");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn message(topic: &str) -> IncomingMessage {
        IncomingMessage {
            topic: topic.into(),
            payload: Payload::Json(json!({"readings": {"temperature": 80}})),
            qos: 1,
            retain: false,
        }
    }

    fn unreachable_config(max_attempts: u32) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".into(),
            // Port 1 (tcpmux) is closed on any sane test host.
            port: 1,
            client_id: "fleetwatch-test".into(),
            connect: ConnectPolicy {
                max_attempts,
                base_delay: Duration::from_millis(10),
                poll_interval: Duration::from_millis(10),
                poll_attempts: 5,
            },
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn subscribe_before_connect_is_not_connected() {
        let client = TransportClient::new(TransportConfig::default());
        let err = client.subscribe("devices/+/telemetry", 1).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected), "got {err:?}");
    }

    #[tokio::test]
    async fn publish_before_connect_is_not_connected() {
        let client = TransportClient::new(TransportConfig::default());
        let err = client
            .publish_json("devices/pump-1/telemetry", &json!({"a": 1}), 0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected), "got {err:?}");
    }

    #[tokio::test]
    async fn connect_to_unreachable_broker_exhausts_attempts() {
        let client = TransportClient::new(unreachable_config(3));

        let err = client.connect().await.unwrap_err();

        match err {
            Error::ConnectionFailed {
                broker, attempts, ..
            } => {
                assert_eq!(broker, "127.0.0.1:1");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(client.state(), ConnectionState::Failed);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_wait_longer_after_each_attempt() {
        let base = Duration::from_millis(100);
        let client = TransportClient::new(TransportConfig {
            connect: ConnectPolicy {
                max_attempts: 3,
                base_delay: base,
                poll_interval: Duration::from_millis(1),
                poll_attempts: 1,
            },
            ..unreachable_config(3)
        });

        let mut states = client.connection_state();
        let watcher = tokio::spawn(async move {
            let mut started = Vec::new();
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                match state {
                    ConnectionState::Connecting { attempt } => {
                        started.push((attempt, tokio::time::Instant::now()));
                    }
                    ConnectionState::Failed => break,
                    _ => {}
                }
            }
            started
        });

        let err = client.connect().await.unwrap_err();
        let started = watcher.await.unwrap();

        assert!(matches!(err, Error::ConnectionFailed { attempts: 3, .. }), "got {err:?}");
        let numbers: Vec<u32> = started.iter().map(|(attempt, _)| *attempt).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        // Each gap is the attempt's short handshake window plus `base * n`.
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1].1 - w[0].1).collect();
        for (n, gap) in (1u32..).zip(&gaps) {
            let expected = base * n;
            assert!(*gap >= expected, "gap {n} was {gap:?}, expected at least {expected:?}");
            assert!(*gap < expected + base / 2, "gap {n} was {gap:?}");
        }
        assert!(gaps[1] > gaps[0]);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let client = TransportClient::new(TransportConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn register_rejects_invalid_pattern() {
        let client = TransportClient::new(TransportConfig::default());
        let result = client.register_callback("devices/#/telemetry", |_| async { Ok(()) });
        assert!(matches!(result, Err(Error::InvalidTopicFilter { .. })));
    }

    #[tokio::test]
    async fn unregister_removes_handler() {
        let client = TransportClient::new(TransportConfig::default());
        client
            .register_callback("devices/+/telemetry", |_| async { Ok(()) })
            .unwrap();

        assert!(client.unregister_callback("devices/+/telemetry"));
        assert!(!client.unregister_callback("devices/+/telemetry"));
        assert_eq!(client.dispatch(message("devices/pump-1/telemetry")), 0);
    }

    #[tokio::test]
    async fn dispatch_invokes_every_matching_handler() {
        let client = TransportClient::new(TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        for pattern in ["devices/+/telemetry", "devices/#", "sites/#"] {
            let tx = tx.clone();
            client
                .register_callback(pattern, move |msg| {
                    let tx = tx.clone();
                    async move {
                        tx.send(format!("{pattern} <- {}", msg.topic)).unwrap();
                        Ok(())
                    }
                })
                .unwrap();
        }
        drop(tx);

        let dispatched = client.dispatch(message("devices/pump-1/telemetry"));
        assert_eq!(dispatched, 2);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "devices/# <- devices/pump-1/telemetry".to_string(),
                "devices/+/telemetry <- devices/pump-1/telemetry".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn slow_or_failing_handler_does_not_block_others() {
        let client = TransportClient::new(TransportConfig::default());
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        client
            .register_callback("devices/#", |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .unwrap();
        client
            .register_callback("devices/+/telemetry", |_| async {
                Err::<(), HandlerError>("decode exploded".into())
            })
            .unwrap();
        {
            let completed = Arc::clone(&completed);
            client
                .register_callback("+/pump-1/#", move |_| {
                    let completed = Arc::clone(&completed);
                    let tx = tx.clone();
                    async move {
                        completed.fetch_add(1, Ordering::SeqCst);
                        tx.send(()).unwrap();
                        Ok(())
                    }
                })
                .unwrap();
        }

        // dispatch returns immediately even though one handler never finishes
        assert_eq!(client.dispatch(message("devices/pump-1/telemetry")), 3);

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("healthy handler should complete")
            .unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }
}
