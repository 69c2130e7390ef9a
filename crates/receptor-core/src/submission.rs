//! The one message type for every data-producing check operation.
//!
//! Check handlers forward these verbatim to a batcher, tagged with the
//! submitting check (and transaction, on the transactional path).

use serde::Serialize;

use crate::health::{CheckData, Stream};
use crate::telemetry::{Event, RawMetric};
use crate::topology::{Component, Instance, Relation};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    StartSnapshot {
        instance: Instance,
    },
    StopSnapshot {
        instance: Instance,
    },
    Component {
        instance: Instance,
        component: Component,
    },
    Relation {
        instance: Instance,
        relation: Relation,
    },
    Delete {
        instance: Instance,
        id: String,
    },
    HealthCheckData {
        stream: Stream,
        data: CheckData,
    },
    HealthStartSnapshot {
        stream: Stream,
        repeat_interval_s: u32,
        expiry_interval_s: u32,
    },
    HealthStopSnapshot {
        stream: Stream,
    },
    RawMetric(RawMetric),
    Event(Event),
}

impl Submission {
    pub fn kind(&self) -> &'static str {
        match self {
            Submission::StartSnapshot { .. } => "start_snapshot",
            Submission::StopSnapshot { .. } => "stop_snapshot",
            Submission::Component { .. } => "component",
            Submission::Relation { .. } => "relation",
            Submission::Delete { .. } => "delete",
            Submission::HealthCheckData { .. } => "health_check_data",
            Submission::HealthStartSnapshot { .. } => "health_start_snapshot",
            Submission::HealthStopSnapshot { .. } => "health_stop_snapshot",
            Submission::RawMetric(_) => "raw_metric",
            Submission::Event(_) => "event",
        }
    }

    /// Whether the item counts toward the batcher's element capacity.
    /// Start markers open a snapshot and carry no data of their own.
    pub fn counts_toward_capacity(&self) -> bool {
        !matches!(
            self,
            Submission::StartSnapshot { .. } | Submission::HealthStartSnapshot { .. }
        )
    }

    /// Whether the item closes a topology or health snapshot.
    pub fn is_stop_snapshot(&self) -> bool {
        matches!(
            self,
            Submission::StopSnapshot { .. } | Submission::HealthStopSnapshot { .. }
        )
    }

    /// Encoded size in bytes of the element as it will appear in the intake
    /// payload. Snapshot markers are zero-sized.
    pub fn encoded_size(&self) -> serde_json::Result<usize> {
        let bytes = match self {
            Submission::StartSnapshot { .. }
            | Submission::StopSnapshot { .. }
            | Submission::HealthStartSnapshot { .. }
            | Submission::HealthStopSnapshot { .. } => return Ok(0),
            Submission::Component { component, .. } => serde_json::to_vec(component)?,
            Submission::Relation { relation, .. } => serde_json::to_vec(relation)?,
            Submission::Delete { id, .. } => serde_json::to_vec(id)?,
            Submission::HealthCheckData { data, .. } => serde_json::to_vec(data)?,
            Submission::RawMetric(metric) => serde_json::to_vec(&metric.to_intake())?,
            Submission::Event(event) => serde_json::to_vec(event)?,
        };
        Ok(bytes.len())
    }
}
