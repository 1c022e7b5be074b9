//! `fleetwatch thresholds` -- print the effective rule table.

use serde::Serialize;
use tabled::Tabled;

use fleetwatch_core::ThresholdRule;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ThresholdEntry {
    sensor: String,
    #[serde(flatten)]
    rule: ThresholdRule,
}

#[derive(Tabled)]
struct ThresholdRow {
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Warning")]
    warning: String,
    #[tabled(rename = "Critical")]
    critical: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Duration (s)")]
    duration: u64,
}

impl From<&ThresholdEntry> for ThresholdRow {
    fn from(entry: &ThresholdEntry) -> Self {
        let sensor = entry.sensor.clone();
        let duration = entry.rule.duration_seconds();
        match &entry.rule {
            ThresholdRule::Numeric(rule) => Self {
                sensor,
                kind: "numeric",
                direction: rule.direction.to_string(),
                warning: rule.warning.to_string(),
                critical: rule.critical.to_string(),
                trigger: "-".into(),
                duration,
            },
            ThresholdRule::Trigger(rule) => Self {
                sensor,
                kind: "trigger",
                direction: "-".into(),
                warning: "-".into(),
                critical: "-".into(),
                trigger: rule.trigger_value.to_string(),
                duration,
            },
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let entries: Vec<ThresholdEntry> = fleetwatch_config::threshold_rules(&cfg)?
        .into_iter()
        .map(|(sensor, rule)| ThresholdEntry { sensor, rule })
        .collect();

    let out = output::render_list(global.output, &entries, |e| ThresholdRow::from(e))?;
    output::print_output(&out, global.quiet);
    Ok(())
}
