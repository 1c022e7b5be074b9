// ── Alert state engine ──
//
// Per-(device, sensor) three-state machine: normal -> warning -> critical,
// any state -> normal. The active map is the engine's only shared mutable
// state; every transition for a key happens under that key's `DashMap`
// entry lock, so concurrent evaluations of one key are serialized.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::model::{
    ActiveAlertState, AlertEvent, AlertEventKind, AlertKey, Device, Direction, NumericRule,
    Severity, ThresholdRule, TriggerRule,
};
use crate::thresholds::ThresholdTable;

/// Turns readings into a deduplicated stream of alert transitions.
pub struct AlertEngine {
    thresholds: Arc<ThresholdTable>,
    active: DashMap<AlertKey, ActiveAlertState>,
}

impl AlertEngine {
    pub fn new(thresholds: Arc<ThresholdTable>) -> Self {
        Self {
            thresholds,
            active: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &Arc<ThresholdTable> {
        &self.thresholds
    }

    /// Evaluate one reading; returns at most one event.
    ///
    /// Sensors without a rule, and values the rule cannot interpret
    /// (e.g. text on a numeric rule), are ignored.
    pub fn evaluate(
        &self,
        device: &Device,
        sensor_type: &str,
        value: &Value,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let Some(rule) = self.thresholds.get(sensor_type) else {
            trace!(device_id = %device.id, sensor_type, "no threshold configured");
            return None;
        };

        match rule {
            ThresholdRule::Trigger(rule) => evaluate_trigger(&rule, device, sensor_type, value, timestamp),
            ThresholdRule::Numeric(rule) => {
                self.evaluate_numeric(&rule, device, sensor_type, value, timestamp)
            }
        }
    }

    fn evaluate_numeric(
        &self,
        rule: &NumericRule,
        device: &Device,
        sensor_type: &str,
        value: &Value,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let Some(reading) = value.as_f64() else {
            debug!(device_id = %device.id, sensor_type, %value, "non-numeric reading for numeric rule");
            return None;
        };
        let key = AlertKey::new(device.id.as_str(), sensor_type);

        let Some((severity, limit)) = rule.classify(reading) else {
            // Normal: resolve whatever was open.
            let (_, state) = self.active.remove(&key)?;
            debug!(%key, previous = %state.severity, "alert resolved");
            return Some(resolved_event(&state, device, sensor_type, value, timestamp));
        };

        match self.active.entry(key) {
            Entry::Occupied(mut entry) if entry.get().severity == severity => {
                let state = entry.get_mut();
                state.value = value.clone();
                state.timestamp = timestamp;
                trace!(key = %entry.key(), %severity, "alert still active");
                None
            }
            Entry::Occupied(mut entry) => {
                let previous = entry.get().severity;
                let kind = if severity > previous {
                    AlertEventKind::Escalated
                } else {
                    AlertEventKind::Opened
                };
                let event = breach_event(kind, rule.direction, device, sensor_type, value, severity, limit, timestamp);
                debug!(key = %entry.key(), %previous, %severity, %kind, "alert severity changed");
                entry.insert(active_state(&event));
                Some(event)
            }
            Entry::Vacant(entry) => {
                let event = breach_event(
                    AlertEventKind::Opened,
                    rule.direction,
                    device,
                    sensor_type,
                    value,
                    severity,
                    limit,
                    timestamp,
                );
                debug!(key = %entry.key(), %severity, "alert opened");
                entry.insert(active_state(&event));
                Some(event)
            }
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Current state for a key, if an alert is open.
    pub fn active_alert(&self, device_id: &str, sensor_type: &str) -> Option<ActiveAlertState> {
        self.active
            .get(&AlertKey::new(device_id, sensor_type))
            .map(|r| r.value().clone())
    }

    /// All open alerts, ordered by key.
    pub fn active_alerts(&self) -> Vec<(AlertKey, ActiveAlertState)> {
        let mut alerts: Vec<_> = self
            .active
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        alerts.sort_by(|a, b| a.0.cmp(&b.0));
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

// ── Event construction ───────────────────────────────────────────

fn evaluate_trigger(
    rule: &TriggerRule,
    device: &Device,
    sensor_type: &str,
    value: &Value,
    timestamp: DateTime<Utc>,
) -> Option<AlertEvent> {
    if !rule.is_triggered_by(value) {
        return None;
    }

    let message = format!(
        "{}: Unexpected {} on {} is {}, matching trigger value {}",
        Severity::Warning.tag(),
        sensor_display_name(sensor_type),
        device.name,
        value,
        rule.trigger_value,
    );
    debug!(device_id = %device.id, sensor_type, "trigger fired");

    Some(AlertEvent {
        kind: AlertEventKind::Opened,
        device_id: device.id.clone(),
        device_name: device.name.clone(),
        sensor_type: sensor_type.to_owned(),
        value: value.clone(),
        threshold_value: rule.trigger_value.clone(),
        severity: Severity::Warning,
        message,
        timestamp,
        resolved_at: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn breach_event(
    kind: AlertEventKind,
    direction: Direction,
    device: &Device,
    sensor_type: &str,
    value: &Value,
    severity: Severity,
    limit: f64,
    timestamp: DateTime<Utc>,
) -> AlertEvent {
    let relation = match direction {
        Direction::Above => "exceeding",
        Direction::Below => "below",
    };
    let message = format!(
        "{}: {} on {} is {}, {} {} threshold of {}",
        severity.tag(),
        sensor_display_name(sensor_type),
        device.name,
        value,
        relation,
        severity,
        limit,
    );

    AlertEvent {
        kind,
        device_id: device.id.clone(),
        device_name: device.name.clone(),
        sensor_type: sensor_type.to_owned(),
        value: value.clone(),
        threshold_value: number_value(limit),
        severity,
        message,
        timestamp,
        resolved_at: None,
    }
}

fn resolved_event(
    state: &ActiveAlertState,
    device: &Device,
    sensor_type: &str,
    value: &Value,
    timestamp: DateTime<Utc>,
) -> AlertEvent {
    let message = format!(
        "RESOLVED: {} on {} is {}, back to normal after {} alert",
        sensor_display_name(sensor_type),
        device.name,
        value,
        state.severity,
    );

    AlertEvent {
        kind: AlertEventKind::Resolved,
        device_id: device.id.clone(),
        device_name: device.name.clone(),
        sensor_type: sensor_type.to_owned(),
        value: value.clone(),
        threshold_value: state.threshold_value.clone(),
        severity: state.severity,
        message,
        timestamp,
        resolved_at: Some(Utc::now()),
    }
}

fn active_state(event: &AlertEvent) -> ActiveAlertState {
    ActiveAlertState {
        severity: event.severity,
        value: event.value.clone(),
        threshold_value: event.threshold_value.clone(),
        message: event.message.clone(),
        timestamp: event.timestamp,
    }
}

/// `fuel_level` -> `Fuel Level`.
pub fn sensor_display_name(sensor_type: &str) -> String {
    sensor_type
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole numbers stay integers in JSON (`90`, not `90.0`).
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ── Tests ────────────────────────────────────────────────────────
