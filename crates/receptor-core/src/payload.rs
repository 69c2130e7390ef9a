//! Intake payload wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::health::Health;
use crate::telemetry::Event;
use crate::topology::Topology;
use crate::types::ActionId;

/// Body of a single POST to the receiver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntakePayload {
    #[serde(rename = "internalHostname")]
    pub internal_hostname: String,
    pub topologies: Vec<Topology>,
    pub health: Vec<Health>,
    /// Raw metrics in their array form, see [`crate::RawMetric::to_intake`].
    pub metrics: Vec<Value>,
    pub events: Vec<Event>,
}

impl IntakePayload {
    pub fn new(internal_hostname: impl Into<String>) -> Self {
        Self {
            internal_hostname: internal_hostname.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.topologies.is_empty()
            && self.health.is_empty()
            && self.metrics.is_empty()
            && self.events.is_empty()
    }
}

/// The action a payload represents for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTransaction {
    pub action_id: ActionId,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Component, Instance};
    use serde_json::json;

    #[test]
    fn payload_wire_shape() {
        let mut topo = Topology::new(Instance::new("s", "u"));
        topo.components.push(Component::new("c1", "t", json!({})));
        let mut payload = IntakePayload::new("host-a");
        payload.topologies.push(topo);

        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["internalHostname"], "host-a");
        assert_eq!(v["topologies"][0]["components"][0]["externalId"], "c1");
        assert!(v["health"].as_array().unwrap().is_empty());
        assert!(v["metrics"].as_array().unwrap().is_empty());
        assert!(v["events"].as_array().unwrap().is_empty());
        assert!(!payload.is_empty());
        assert!(IntakePayload::new("h").is_empty());
    }
}
