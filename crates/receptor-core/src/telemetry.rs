//! Raw metrics and events.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A single raw metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetric {
    pub name: String,
    pub timestamp: i64,
    #[serde(default)]
    pub host_name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawMetric {
    pub fn new(name: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            host_name: String::new(),
            value,
            tags: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_name = host.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Convert to the v1 intake metric form:
    /// `[name, timestamp, value, {"hostname", "type": "raw", "tags"}]`.
    pub fn to_intake(&self) -> Value {
        json!([
            self.name,
            self.timestamp,
            self.value,
            {
                "hostname": self.host_name,
                "type": "raw",
                "tags": self.tags,
            }
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}

/// Contextual identifiers attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub element_identifiers: Vec<String>,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub source_links: Vec<SourceLink>,
}

/// A titled, tagged event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "msg_title")]
    pub title: String,
    #[serde(rename = "msg_text", default)]
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
}

impl Event {
    pub fn new(title: impl Into<String>, timestamp: i64) -> Self {
        Self {
            title: title.into(),
            text: String::new(),
            timestamp,
            priority: None,
            host: String::new(),
            tags: Vec::new(),
            alert_type: None,
            aggregation_key: None,
            source_type_name: None,
            event_type: None,
            context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_metric_intake_form() {
        let metric = RawMetric::new("cpu", 1_700_000_000, 0.5)
            .with_host("node-1")
            .with_tags(vec!["env:prod".to_string()]);
        let v = metric.to_intake();
        assert_eq!(v[0], "cpu");
        assert_eq!(v[1], 1_700_000_000);
        assert_eq!(v[2], 0.5);
        assert_eq!(v[3]["hostname"], "node-1");
        assert_eq!(v[3]["type"], "raw");
        assert_eq!(v[3]["tags"][0], "env:prod");
    }

    #[test]
    fn event_uses_msg_field_names() {
        let mut event = Event::new("deploy", 10);
        event.text = "rolled out".to_string();
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["msg_title"], "deploy");
        assert_eq!(v["msg_text"], "rolled out");
        assert!(v.get("context").is_none());
    }
}
