// ── Topic filter matching ──
//
// MQTT-style hierarchical topics: levels separated by `/`, `+` matches
// exactly one level, `#` matches the remainder (including the parent level).
// Validation and matching follow rumqttc; only `+` capture is local.

use std::fmt;

use crate::error::Error;

const SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// A validated subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validate and wrap a filter string.
    pub fn new(filter: impl Into<String>) -> Result<Self, Error> {
        let filter = filter.into();
        if filter.is_empty() {
            return Err(Error::InvalidTopicFilter {
                filter,
                reason: "filter is empty",
            });
        }
        if !rumqttc::valid_filter(&filter) {
            return Err(Error::InvalidTopicFilter {
                filter,
                reason: "wildcards must occupy a whole level and '#' only the last",
            });
        }
        Ok(Self(filter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Does this filter match the concrete `topic`?
    pub fn matches(&self, topic: &str) -> bool {
        rumqttc::matches(topic, &self.0)
    }

    /// The concrete levels matched by each `+` wildcard, in order.
    ///
    /// Returns `None` when the topic does not match at all.
    pub fn captures<'t>(&self, topic: &'t str) -> Option<Vec<&'t str>> {
        if !self.matches(topic) {
            return None;
        }
        let captured = self
            .0
            .split(SEPARATOR)
            .take_while(|level| *level != MULTI_LEVEL)
            .zip(topic.split(SEPARATOR))
            .filter(|(level, _)| *level == SINGLE_LEVEL)
            .map(|(_, concrete)| concrete)
            .collect();
        Some(captured)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
