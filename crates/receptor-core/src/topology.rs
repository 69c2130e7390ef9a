//! Topology records: instances, components, relations and snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical source of a topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub url: String,
}

impl Instance {
    pub fn new(instance_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentType {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub data: Value,
}

impl Component {
    pub fn new(external_id: impl Into<String>, type_name: impl Into<String>, data: Value) -> Self {
        Self {
            external_id: external_id.into(),
            component_type: ComponentType {
                name: type_name.into(),
            },
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "type")]
    pub relation_type: ComponentType,
    pub data: Value,
}

impl Relation {
    /// Build a relation whose external id is derived as `source-type-target`.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        type_name: impl Into<String>,
        data: Value,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        let type_name = type_name.into();
        Self {
            external_id: relation_external_id(&source_id, &type_name, &target_id),
            source_id,
            target_id,
            relation_type: ComponentType { name: type_name },
            data,
        }
    }
}

/// Canonical external id for a relation synthesized by the core.
pub fn relation_external_id(source_id: &str, type_name: &str, target_id: &str) -> String {
    format!("{source_id}-{type_name}-{target_id}")
}

/// Accumulated topology for one instance inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub start_snapshot: bool,
    pub stop_snapshot: bool,
    pub instance: Instance,
    pub components: Vec<Component>,
    pub relations: Vec<Relation>,
    pub delete_ids: Vec<String>,
}

impl Topology {
    pub fn new(instance: Instance) -> Self {
        Self {
            start_snapshot: false,
            stop_snapshot: false,
            instance,
            components: Vec::new(),
            relations: Vec::new(),
            delete_ids: Vec::new(),
        }
    }

    /// Number of topology elements (components, relations, deletes).
    pub fn element_count(&self) -> usize {
        self.components.len() + self.relations.len() + self.delete_ids.len()
    }
}
