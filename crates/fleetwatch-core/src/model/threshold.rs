// ── Threshold rule shapes ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::alert::Severity;

/// Which side of a limit counts as a breach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Breach when the value is at or above the limit.
    #[default]
    Above,
    /// Breach when the value is at or below the limit (battery, fuel).
    Below,
}

/// Numeric rule: graded warning/critical limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRule {
    pub warning: f64,
    pub critical: f64,
    #[serde(default)]
    pub direction: Direction,
    /// Carried for configuration compatibility; breaches are immediate.
    #[serde(default, alias = "durationSeconds")]
    pub duration_seconds: u64,
}

impl NumericRule {
    pub fn above(warning: f64, critical: f64, duration_seconds: u64) -> Self {
        Self {
            warning,
            critical,
            direction: Direction::Above,
            duration_seconds,
        }
    }

    pub fn below(warning: f64, critical: f64, duration_seconds: u64) -> Self {
        Self {
            warning,
            critical,
            direction: Direction::Below,
            duration_seconds,
        }
    }

    /// Severity of `value` and the limit it crossed; `None` means normal.
    ///
    /// Critical is checked before warning.
    pub fn classify(&self, value: f64) -> Option<(Severity, f64)> {
        let crossed = |limit: f64| match self.direction {
            Direction::Above => value >= limit,
            Direction::Below => value <= limit,
        };

        if crossed(self.critical) {
            Some((Severity::Critical, self.critical))
        } else if crossed(self.warning) {
            Some((Severity::Warning, self.warning))
        } else {
            None
        }
    }
}

/// Trigger rule: equality with `trigger_value` is always a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    #[serde(alias = "triggerValue")]
    pub trigger_value: serde_json::Value,
    #[serde(default, alias = "durationSeconds")]
    pub duration_seconds: u64,
}

impl TriggerRule {
    pub fn new(trigger_value: impl Into<serde_json::Value>, duration_seconds: u64) -> Self {
        Self {
            trigger_value: trigger_value.into(),
            duration_seconds,
        }
    }

    pub fn is_triggered_by(&self, value: &serde_json::Value) -> bool {
        *value == self.trigger_value
    }
}

/// Per-sensor threshold configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdRule {
    Numeric(NumericRule),
    Trigger(TriggerRule),
}

impl ThresholdRule {
    pub fn duration_seconds(&self) -> u64 {
        match self {
            Self::Numeric(rule) => rule.duration_seconds,
            Self::Trigger(rule) => rule.duration_seconds,
        }
    }
}

impl From<NumericRule> for ThresholdRule {
    fn from(rule: NumericRule) -> Self {
        Self::Numeric(rule)
    }
}

impl From<TriggerRule> for ThresholdRule {
    fn from(rule: TriggerRule) -> Self {
        Self::Trigger(rule)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn above_rule_checks_critical_first() {
        let rule = NumericRule::above(75.0, 90.0, 300);
        assert_eq!(rule.classify(95.0), Some((Severity::Critical, 90.0)));
        assert_eq!(rule.classify(90.0), Some((Severity::Critical, 90.0)));
        assert_eq!(rule.classify(80.0), Some((Severity::Warning, 75.0)));
        assert_eq!(rule.classify(74.9), None);
    }

    #[test]
    fn below_rule_breaches_on_low_values() {
        let rule = NumericRule::below(20.0, 10.0, 0);
        assert_eq!(rule.classify(5.0), Some((Severity::Critical, 10.0)));
        assert_eq!(rule.classify(15.0), Some((Severity::Warning, 20.0)));
        assert_eq!(rule.classify(80.0), None);
    }

    #[test]
    fn untagged_rules_deserialize_by_shape() {
        let numeric: ThresholdRule =
            serde_json::from_value(json!({"warning": 75, "critical": 90, "durationSeconds": 300}))
                .unwrap();
        assert_eq!(numeric, NumericRule::above(75.0, 90.0, 300).into());

        let trigger: ThresholdRule =
            serde_json::from_value(json!({"trigger_value": true, "duration_seconds": 0})).unwrap();
        assert_eq!(trigger, TriggerRule::new(true, 0).into());

        let below: ThresholdRule =
            serde_json::from_value(json!({"warning": 20, "critical": 10, "direction": "below"}))
                .unwrap();
        assert_eq!(below, NumericRule::below(20.0, 10.0, 0).into());
    }

    #[test]
    fn trigger_matches_by_equality() {
        let rule = TriggerRule::new(true, 0);
        assert!(rule.is_triggered_by(&json!(true)));
        assert!(!rule.is_triggered_by(&json!(false)));
        assert!(!rule.is_triggered_by(&json!("true")));
    }
}
