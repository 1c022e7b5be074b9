// ── Notification dispatcher ──
//
// Best-effort fan-out of an alert to external HTTP channels. Every
// delivery is independent: a failing channel is logged and reported,
// never retried, and never stops the others.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{AlertEvent, PersistedAlert, Severity};

/// An external notification channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
    Webhook,
}

impl Channel {
    /// Channels selected for an alert of `severity`.
    ///
    /// Push always; critical alerts add email and SMS. Webhook endpoints
    /// are never selected by severity.
    pub fn for_severity(severity: Severity) -> Vec<Self> {
        match severity {
            Severity::Warning => vec![Self::Push],
            Severity::Critical => vec![Self::Push, Self::Email, Self::Sms],
        }
    }

    /// Environment variable naming this channel's endpoint.
    pub fn env_var(self) -> String {
        format!("{}_NOTIFICATION_ENDPOINT", self.to_string().to_uppercase())
    }

    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Endpoints and request timeout for the dispatcher.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub endpoints: BTreeMap<Channel, String>,
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl NotificationConfig {
    #[must_use]
    pub fn with_endpoint(mut self, channel: Channel, url: impl Into<String>) -> Self {
        self.endpoints.insert(channel, url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// JSON body posted to every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub alert_id: String,
    pub device_id: String,
    pub device_name: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(event: &AlertEvent, alert: &PersistedAlert) -> Self {
        Self {
            alert_id: alert.id.clone(),
            device_id: event.device_id.clone(),
            device_name: event.device_name.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{channel} delivery failed: {source}")]
    Http {
        channel: Channel,
        #[source]
        source: reqwest::Error,
    },

    #[error("{channel} endpoint returned HTTP {status}")]
    Status { channel: Channel, status: u16 },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl NotificationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http { source, .. } if source.is_timeout())
    }
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<Channel>,
    pub failed: Vec<NotificationError>,
    /// Selected but no endpoint configured.
    pub skipped: Vec<Channel>,
    /// Set when the alert was resolved and nothing was sent.
    pub suppressed: bool,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct NotificationDispatcher {
    http: reqwest::Client,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("fleetwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NotificationError::Client)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Deliver `alert` to every channel its severity selects.
    pub async fn dispatch(&self, event: &AlertEvent, alert: &PersistedAlert) -> DispatchReport {
        let mut report = DispatchReport::default();

        if event.is_resolved() || alert.resolved {
            debug!(alert_id = %alert.id, "resolved alert, notifications suppressed");
            report.suppressed = true;
            return report;
        }

        let payload = NotificationPayload::new(event, alert);
        let mut targets = Vec::new();
        for channel in Channel::for_severity(alert.severity) {
            match self.config.endpoints.get(&channel) {
                Some(url) => targets.push((channel, url.as_str())),
                None => report.skipped.push(channel),
            }
        }

        let deliveries = targets
            .into_iter()
            .map(|(channel, url)| self.deliver(channel, url, &payload));

        for (channel, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered.push(channel),
                Err(e) => {
                    warn!(alert_id = %alert.id, %channel, error = %e, "notification failed");
                    report.failed.push(e);
                }
            }
        }

        info!(
            alert_id = %alert.id,
            severity = %alert.severity,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "notifications dispatched"
        );
        report
    }

    async fn deliver(
        &self,
        channel: Channel,
        url: &str,
        payload: &NotificationPayload,
    ) -> (Channel, Result<(), NotificationError>) {
        let result = async {
            let resp = self
                .http
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(|source| NotificationError::Http { channel, source })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(NotificationError::Status {
                    channel,
                    status: status.as_u16(),
                });
            }
            debug!(%channel, "notification delivered");
            Ok(())
        }
        .await;

        (channel, result)
    }
}
