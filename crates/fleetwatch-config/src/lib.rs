//! Configuration for the fleetwatch service.
//!
//! Layered loading (built-in defaults, TOML file, `FLEETWATCH_` env vars,
//! legacy `*_NOTIFICATION_ENDPOINT` vars), broker password resolution, and
//! translation to the runtime types of `fleetwatch-transport` and
//! `fleetwatch-core`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetwatch_core::thresholds::default_rules;
use fleetwatch_core::{
    Channel, Device, Direction, NotificationConfig, ServiceConfig, ThresholdMap, ThresholdRule,
};
use fleetwatch_transport::{
    ConnectPolicy, Credentials, ReconnectConfig, TopicFilter, TransportConfig,
};

/// Env var consulted for the broker password when `password_env` is unset.
pub const PASSWORD_ENV: &str = "FLEETWATCH_BROKER_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file already exists at {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Per-sensor rules, layered over the built-in table.
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdRule>,

    /// Devices known to the in-memory store.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            telemetry: TelemetryConfig::default(),
            notifications: NotificationsConfig::default(),
            thresholds: default_rules(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,

    pub username: Option<String>,

    /// Password (plaintext -- prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    pub keep_alive_secs: u64,
    pub max_connect_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub connect_poll_interval_ms: u64,
    pub connect_poll_attempts: u32,
    pub reconnect_max_delay_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fleetwatch".into(),
            username: None,
            password: None,
            password_env: None,
            keep_alive_secs: 60,
            max_connect_attempts: 5,
            retry_base_delay_ms: 2000,
            connect_poll_interval_ms: 500,
            connect_poll_attempts: 10,
            reconnect_max_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub topic: String,
    pub qos: u8,

    /// Re-publish target for alert events; `{device_id}` is substituted.
    pub alerts_topic: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let runtime = ServiceConfig::default();
        Self {
            topic: runtime.telemetry_topic,
            qos: runtime.qos,
            alerts_topic: runtime.alerts_topic,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub email: Option<String>,
    pub sms: Option<String>,
    pub push: Option<String>,
    pub webhook: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            email: None,
            sms: None,
            push: None,
            webhook: None,
            timeout_secs: 5,
        }
    }
}

impl NotificationsConfig {
    pub fn endpoint(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.sms.as_deref(),
            Channel::Push => self.push.as_deref(),
            Channel::Webhook => self.webhook.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    /// Display name; defaults to the id.
    pub name: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "fleetwatch", "fleetwatch").map_or_else(
        || PathBuf::from(".fleetwatch.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// The full provider stack, lowest precedence first.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLEETWATCH_").split("__"))
        .merge(endpoint_env())
}

/// `EMAIL_NOTIFICATION_ENDPOINT` and friends, mapped onto `[notifications]`.
fn endpoint_env() -> Env {
    Env::raw().filter_map(|key| {
        match key.as_str().to_ascii_lowercase().as_str() {
            "email_notification_endpoint" => Some("notifications.email".into()),
            "sms_notification_endpoint" => Some("notifications.sms".into()),
            "push_notification_endpoint" => Some("notifications.push".into()),
            "webhook_notification_endpoint" => Some("notifications.webhook".into()),
            _ => None,
        }
    })
}

/// Load the config from `path` (or the default location) plus environment.
///
/// A missing file is not an error; defaults and env still apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Write a default config file. Refuses to overwrite unless `force`.
pub fn init_config(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    save_config(&Config::default(), path)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the broker password: `password_env`, then
/// `FLEETWATCH_BROKER_PASSWORD`, then the plaintext value.
pub fn resolve_password(broker: &BrokerConfig) -> Option<SecretString> {
    // 1. Named env var
    if let Some(ref env_name) = broker.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. Well-known env var
    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Some(SecretString::from(val));
    }

    // 3. Plaintext in config
    broker.password.clone().map(SecretString::from)
}

/// Broker login, if a username is configured.
pub fn resolve_credentials(broker: &BrokerConfig) -> Option<Credentials> {
    let username = broker.username.clone()?;
    let password = resolve_password(broker).unwrap_or_else(|| SecretString::from(String::new()));
    Some(Credentials { username, password })
}

// ── Translation to runtime types ────────────────────────────────────

pub fn transport_config(cfg: &Config) -> Result<TransportConfig, ConfigError> {
    let broker = &cfg.broker;

    if broker.host.trim().is_empty() {
        return Err(invalid("broker.host", "must not be empty"));
    }
    if broker.port == 0 {
        return Err(invalid("broker.port", "must be between 1 and 65535"));
    }
    if broker.max_connect_attempts == 0 {
        return Err(invalid("broker.max_connect_attempts", "must be at least 1"));
    }

    Ok(TransportConfig {
        host: broker.host.clone(),
        port: broker.port,
        client_id: broker.client_id.clone(),
        credentials: resolve_credentials(broker),
        keep_alive: Duration::from_secs(broker.keep_alive_secs),
        clean_session: true,
        connect: ConnectPolicy {
            max_attempts: broker.max_connect_attempts,
            base_delay: Duration::from_millis(broker.retry_base_delay_ms),
            poll_interval: Duration::from_millis(broker.connect_poll_interval_ms),
            poll_attempts: broker.connect_poll_attempts.max(1),
        },
        reconnect: ReconnectConfig {
            max_delay: Duration::from_secs(broker.reconnect_max_delay_secs),
            ..ReconnectConfig::default()
        },
    })
}

pub fn service_config(cfg: &Config) -> Result<ServiceConfig, ConfigError> {
    let telemetry = &cfg.telemetry;

    TopicFilter::new(telemetry.topic.as_str())
        .map_err(|e| invalid("telemetry.topic", e.to_string()))?;
    if telemetry.qos > 2 {
        return Err(invalid("telemetry.qos", format!("expected 0, 1 or 2, got {}", telemetry.qos)));
    }
    if let Some(ref topic) = telemetry.alerts_topic {
        if topic.contains(['+', '#']) {
            return Err(invalid("telemetry.alerts_topic", "must not contain wildcards"));
        }
    }

    Ok(ServiceConfig {
        telemetry_topic: telemetry.topic.clone(),
        qos: telemetry.qos,
        alerts_topic: telemetry.alerts_topic.clone(),
    })
}

pub fn notification_config(cfg: &Config) -> NotificationConfig {
    let notifications = &cfg.notifications;
    let endpoints = Channel::all()
        .filter_map(|channel| {
            notifications
                .endpoint(channel)
                .filter(|url| !url.trim().is_empty())
                .map(|url| (channel, url.to_owned()))
        })
        .collect();

    NotificationConfig {
        endpoints,
        timeout: Duration::from_secs(notifications.timeout_secs.max(1)),
    }
}

/// The effective threshold table, with each numeric rule checked for
/// consistent limits.
pub fn threshold_rules(cfg: &Config) -> Result<ThresholdMap, ConfigError> {
    for (sensor, rule) in &cfg.thresholds {
        if let ThresholdRule::Numeric(rule) = rule {
            let ordered = match rule.direction {
                Direction::Above => rule.warning <= rule.critical,
                Direction::Below => rule.warning >= rule.critical,
            };
            if !ordered {
                return Err(invalid(
                    format!("thresholds.{sensor}"),
                    format!(
                        "warning {} and critical {} are inverted for direction '{}'",
                        rule.warning, rule.critical, rule.direction
                    ),
                ));
            }
        }
    }
    Ok(cfg.thresholds.clone())
}

pub fn devices(cfg: &Config) -> Vec<Device> {
    cfg.devices
        .iter()
        .map(|entry| Device::new(entry.id.clone(), entry.name.clone().unwrap_or_else(|| entry.id.clone())))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn load(jail: &Jail) -> Result<Config, figment::Error> {
        load_config(Some(&jail.directory().join("config.toml"))).map_err(|e| e.to_string().into())
    }

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|jail| {
            let cfg = load(jail)?;
            assert_eq!(cfg.broker.host, "localhost");
            assert_eq!(cfg.broker.port, 1883);
            assert_eq!(cfg.telemetry.topic, "devices/+/telemetry");
            assert_eq!(cfg.notifications.timeout_secs, 5);
            assert_eq!(cfg.thresholds.len(), 8);
            assert!(cfg.devices.is_empty());
            Ok(())
        });
    }

    #[test]
    fn file_overrides_and_merges_thresholds() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [broker]
                host = "mqtt.plant.local"
                username = "ingest"

                [thresholds.temperature]
                warning = 60.0

                [thresholds.humidity]
                warning = 70.0
                critical = 85.0

                [[devices]]
                id = "pump-7"
                name = "Pump 7"

                [[devices]]
                id = "fan-2"
                "#,
            )?;

            let cfg = load(jail)?;
            assert_eq!(cfg.broker.host, "mqtt.plant.local");
            assert_eq!(cfg.broker.port, 1883);

            let rules = threshold_rules(&cfg).unwrap();
            let ThresholdRule::Numeric(temp) = &rules["temperature"] else {
                panic!("temperature should stay numeric");
            };
            assert_eq!(temp.warning, 60.0);
            assert_eq!(temp.critical, 90.0);
            assert!(rules.contains_key("humidity"));
            assert!(matches!(rules["motion"], ThresholdRule::Trigger(_)));

            let devices = devices(&cfg);
            assert_eq!(devices[0], Device::new("pump-7", "Pump 7"));
            assert_eq!(devices[1], Device::new("fan-2", "fan-2"));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[broker]\nport = 1884\n")?;
            jail.set_env("FLEETWATCH_BROKER__PORT", "8883");
            jail.set_env("FLEETWATCH_TELEMETRY__QOS", "2");

            let cfg = load(jail)?;
            assert_eq!(cfg.broker.port, 8883);
            assert_eq!(cfg.telemetry.qos, 2);
            Ok(())
        });
    }

    #[test]
    fn legacy_endpoint_vars_fill_notifications() {
        Jail::expect_with(|jail| {
            jail.set_env("EMAIL_NOTIFICATION_ENDPOINT", "http://notify.local/email");
            jail.set_env("PUSH_NOTIFICATION_ENDPOINT", "http://notify.local/push");

            let cfg = load(jail)?;
            let notify = notification_config(&cfg);
            assert_eq!(
                notify.endpoints.get(&Channel::Email).map(String::as_str),
                Some("http://notify.local/email")
            );
            assert_eq!(notify.endpoints.len(), 2);
            assert_eq!(notify.timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn password_resolution_order() {
        Jail::expect_with(|jail| {
            let mut broker = BrokerConfig {
                username: Some("ingest".into()),
                password: Some("plaintext".into()),
                password_env: Some("PLANT_MQTT_PASSWORD".into()),
                ..BrokerConfig::default()
            };
            assert_eq!(resolve_password(&broker).unwrap().expose_secret(), "plaintext");

            jail.set_env(PASSWORD_ENV, "well-known");
            assert_eq!(resolve_password(&broker).unwrap().expose_secret(), "well-known");

            jail.set_env("PLANT_MQTT_PASSWORD", "named");
            assert_eq!(resolve_password(&broker).unwrap().expose_secret(), "named");

            broker.username = None;
            assert!(resolve_credentials(&broker).is_none());
            Ok(())
        });
    }

    #[test]
    fn transport_translation() {
        let cfg = Config {
            broker: BrokerConfig {
                max_connect_attempts: 3,
                retry_base_delay_ms: 250,
                ..BrokerConfig::default()
            },
            ..Config::default()
        };

        let transport = transport_config(&cfg).unwrap();
        assert_eq!(transport.broker(), "localhost:1883");
        assert_eq!(transport.connect.max_attempts, 3);
        assert_eq!(transport.connect.base_delay, Duration::from_millis(250));
        assert!(transport.credentials.is_none());
    }

    #[test]
    fn validation_errors() {
        let mut cfg = Config::default();
        cfg.broker.port = 0;
        assert!(matches!(transport_config(&cfg), Err(ConfigError::Validation { .. })));

        let mut cfg = Config::default();
        cfg.telemetry.topic = "devices/#/telemetry".into();
        assert!(service_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.telemetry.qos = 3;
        assert!(service_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.thresholds
            .insert("pressure".into(), fleetwatch_core::NumericRule::above(220.0, 180.0, 0).into());
        let err = threshold_rules(&cfg).unwrap_err();
        assert!(err.to_string().contains("thresholds.pressure"));
    }

    #[test]
    fn init_writes_loadable_file_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        init_config(&path, false).unwrap();
        assert!(matches!(init_config(&path, false), Err(ConfigError::AlreadyExists { .. })));
        init_config(&path, true).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&written).unwrap();
        assert_eq!(parsed.thresholds.len(), 8);
        assert_eq!(parsed.broker.client_id, "fleetwatch");
    }
}
