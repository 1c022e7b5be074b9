//! `fleetwatch evaluate` -- replay recorded telemetry through the engine.
//!
//! Input is JSON lines: `{deviceId, deviceName?, timestamp?, readings}`.
//! No broker, store, or notifier is involved.

use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tabled::Tabled;

use fleetwatch_core::model::telemetry::device_id_hint;
use fleetwatch_core::{AlertEngine, AlertEvent, Device, Telemetry, ThresholdTable};
use fleetwatch_transport::Payload;

use crate::cli::{EvaluateArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Event")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&AlertEvent> for EventRow {
    fn from(e: &AlertEvent) -> Self {
        Self {
            time: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            device: e.device_name.clone(),
            sensor: e.sensor_type.clone(),
            kind: e.kind.to_string(),
            severity: e.severity.to_string(),
            value: e.value.to_string(),
            message: e.message.clone(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &EvaluateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let rules = fleetwatch_config::threshold_rules(&cfg)?;
    let engine = AlertEngine::new(Arc::new(ThresholdTable::new(rules)));

    let reader: Box<dyn BufRead> = match args.file.as_deref() {
        None => Box::new(BufReader::new(io::stdin())),
        Some(path) if path == Path::new("-") => Box::new(BufReader::new(io::stdin())),
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path)?)),
    };

    let events = evaluate_lines(&engine, reader)?;
    tracing::info!(events = events.len(), "evaluation finished");

    let out = output::render_list(global.output, &events, |e| EventRow::from(e))?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn evaluate_lines(engine: &AlertEngine, reader: impl BufRead) -> Result<Vec<AlertEvent>, CliError> {
    let mut events = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let field = || format!("line {}", index + 1);

        let value: Value = serde_json::from_str(&line).map_err(|e| CliError::Validation {
            field: field(),
            reason: e.to_string(),
        })?;
        let device = record_device(&value).ok_or_else(|| CliError::Validation {
            field: field(),
            reason: "missing deviceId".into(),
        })?;
        let telemetry = Telemetry::from_value(&value, Utc::now()).map_err(|e| CliError::Validation {
            field: field(),
            reason: e.to_string(),
        })?;

        for (sensor_type, reading) in &telemetry.readings {
            events.extend(engine.evaluate(&device, sensor_type, reading, telemetry.timestamp));
        }
    }

    Ok(events)
}

fn record_device(value: &Value) -> Option<Device> {
    let payload = Payload::Json(value.clone());
    let id = device_id_hint(&payload)?.to_owned();
    let name = value
        .get("deviceName")
        .or_else(|| value.get("device_name"))
        .and_then(Value::as_str)
        .map_or_else(|| id.clone(), str::to_owned);
    Some(Device::new(id, name))
}
