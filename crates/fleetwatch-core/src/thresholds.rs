// ── Threshold table ──
//
// Sensor type -> rule. Reads are wait-free; `reload` swaps the whole
// table atomically so evaluations never see a half-applied update.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::model::{NumericRule, ThresholdRule, TriggerRule};

pub type ThresholdMap = BTreeMap<String, ThresholdRule>;

/// Reloadable mapping from sensor type to threshold rule.
pub struct ThresholdTable {
    rules: ArcSwap<ThresholdMap>,
}

impl ThresholdTable {
    pub fn new(rules: ThresholdMap) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Rule for `sensor_type`, if one is configured.
    pub fn get(&self, sensor_type: &str) -> Option<ThresholdRule> {
        self.rules.load().get(sensor_type).cloned()
    }

    /// Replace every rule at once.
    pub fn reload(&self, rules: ThresholdMap) {
        let count = rules.len();
        self.rules.store(Arc::new(rules));
        info!(rules = count, "threshold table reloaded");
    }

    /// Point-in-time copy of the table.
    pub fn snapshot(&self) -> Arc<ThresholdMap> {
        self.rules.load_full()
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

/// Built-in rules for the standard sensor set.
pub fn default_rules() -> ThresholdMap {
    let mut rules = ThresholdMap::new();
    let mut add = |sensor: &str, rule: ThresholdRule| {
        rules.insert(sensor.to_owned(), rule);
    };

    add("temperature", NumericRule::above(75.0, 90.0, 300).into());
    add("pressure", NumericRule::above(180.0, 220.0, 120).into());
    add("vibration", NumericRule::above(15.0, 25.0, 180).into());
    // Low-is-bad sensors: these breach at or below their limits instead of
    // the plain `>= critical`, then `>= warning` check the other rules use.
    add("fuel_level", NumericRule::below(15.0, 5.0, 0).into());
    add("battery", NumericRule::below(20.0, 10.0, 0).into());
    add("utilization", NumericRule::above(90.0, 95.0, 3600).into());
    add("motion", TriggerRule::new(true, 0).into());
    add("geofence", TriggerRule::new(true, 0).into());

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_standard_sensors() {
        let table = ThresholdTable::default();
        assert_eq!(table.len(), 8);
        assert!(matches!(table.get("temperature"), Some(ThresholdRule::Numeric(_))));
        assert!(matches!(table.get("geofence"), Some(ThresholdRule::Trigger(_))));
        assert!(table.get("humidity").is_none());
    }

    #[test]
    fn only_low_is_bad_sensors_use_below() {
        use crate::model::Direction;

        for (sensor, rule) in default_rules() {
            let ThresholdRule::Numeric(rule) = rule else {
                continue;
            };
            let expected = if matches!(sensor.as_str(), "battery" | "fuel_level") {
                Direction::Below
            } else {
                Direction::Above
            };
            assert_eq!(rule.direction, expected, "{sensor}");
        }
    }

    #[test]
    fn reload_replaces_all_rules() {
        let table = ThresholdTable::default();
        let before = table.snapshot();

        let mut rules = ThresholdMap::new();
        rules.insert("humidity".into(), NumericRule::above(70.0, 85.0, 0).into());
        table.reload(rules);

        assert_eq!(table.len(), 1);
        assert!(table.get("temperature").is_none());
        assert!(table.get("humidity").is_some());
        // Earlier snapshots are unaffected.
        assert_eq!(before.len(), 8);
    }
}
