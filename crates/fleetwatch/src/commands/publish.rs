//! `fleetwatch publish` -- send one telemetry message.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use fleetwatch_transport::TransportClient;

use crate::cli::{GlobalOpts, PublishArgs};
use crate::error::CliError;

pub async fn handle(args: PublishArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let transport = fleetwatch_config::transport_config(&cfg)?;

    let topic = match args.topic {
        Some(topic) => topic,
        None => topic_for_device(&cfg.telemetry.topic, &args.device)?,
    };
    let qos = args.qos.unwrap_or(cfg.telemetry.qos);
    let message = json!({
        "deviceId": args.device,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "readings": parse_readings(&args.readings)?,
    });

    let client = TransportClient::new(transport);
    client.connect().await?;
    let published = client.publish_json(&topic, &message, qos, false).await;
    client.disconnect().await;
    published?;

    if !global.quiet {
        eprintln!("Published {} reading(s) to {topic}", args.readings.len());
    }
    Ok(())
}

/// Fill the first `+` level of the telemetry pattern with the device id.
fn topic_for_device(pattern: &str, device: &str) -> Result<String, CliError> {
    let mut filled = false;
    let levels: Vec<&str> = pattern
        .split('/')
        .map(|level| {
            if level == "+" && !filled {
                filled = true;
                device
            } else {
                level
            }
        })
        .collect();

    let topic = levels.join("/");
    if !filled || topic.contains(['+', '#']) {
        return Err(CliError::Validation {
            field: "topic".into(),
            reason: format!("cannot derive a topic from pattern '{pattern}'; pass --topic"),
        });
    }
    Ok(topic)
}

/// `sensor=value` pairs; values that are not valid JSON are sent as strings.
fn parse_readings(raw: &[String]) -> Result<Map<String, Value>, CliError> {
    raw.iter()
        .map(|pair| {
            let (sensor, value) = pair.split_once('=').ok_or_else(|| CliError::Validation {
                field: "reading".into(),
                reason: format!("expected SENSOR=VALUE, got '{pair}'"),
            })?;
            let sensor = sensor.trim();
            if sensor.is_empty() {
                return Err(CliError::Validation {
                    field: "reading".into(),
                    reason: format!("missing sensor name in '{pair}'"),
                });
            }
            let value = serde_json::from_str(value.trim())
                .unwrap_or_else(|_| Value::String(value.trim().to_owned()));
            Ok((sensor.to_owned(), value))
        })
        .collect()
}
