//! Per-check accumulation shared by both batchers.

use std::collections::HashMap;

use receptor_core::{
    CheckId, Event, Health, Instance, IntakePayload, RawMetric,
    StartSnapshotMetadata, StopSnapshotMetadata, Stream, Submission, Topology, TransactionId,
};
use serde::Serialize;

/// The transaction a batch state belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTransaction {
    pub transaction_id: TransactionId,
    /// Set by StopTransaction; the next payload carries the final action.
    pub completed: bool,
}

/// Everything one check has submitted since the last flush.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    pub transaction: Option<BatchTransaction>,
    pub topologies: Vec<Topology>,
    pub health: Vec<Health>,
    pub metrics: Vec<RawMetric>,
    pub events: Vec<Event>,
    elements: usize,
    bytes: usize,
}

impl BatchState {
    fn for_transaction(transaction_id: Option<&str>) -> Self {
        Self {
            transaction: transaction_id.map(|id| BatchTransaction {
                transaction_id: id.to_string(),
                completed: false,
            }),
            ..Self::default()
        }
    }

    pub fn has_data(&self) -> bool {
        !(self.topologies.is_empty()
            && self.health.is_empty()
            && self.metrics.is_empty()
            && self.events.is_empty())
    }

    /// Data to send, or a completed transaction that still needs its
    /// final action.
    pub fn is_flushable(&self) -> bool {
        self.has_data() || self.transaction.as_ref().is_some_and(|t| t.completed)
    }

    pub fn element_count(&self) -> usize {
        self.elements
    }

    fn topology(&mut self, instance: Instance) -> &mut Topology {
        let idx = match self.topologies.iter().position(|t| t.instance == instance) {
            Some(idx) => idx,
            None => {
                self.topologies.push(Topology::new(instance));
                self.topologies.len() - 1
            }
        };
        &mut self.topologies[idx]
    }

    fn health(&mut self, stream: Stream) -> &mut Health {
        let idx = match self.health.iter().position(|h| h.stream == stream) {
            Some(idx) => idx,
            None => {
                self.health.push(Health::new(stream));
                self.health.len() - 1
            }
        };
        &mut self.health[idx]
    }
}

/// Diagnostic view of one check's batch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub transaction: Option<BatchTransaction>,
    pub elements: usize,
    pub topologies: usize,
    pub components: usize,
    pub health_streams: usize,
    pub metrics: usize,
    pub events: usize,
}

/// Room for a field name and separators around a snapshot marker.
const MARKER_FIELD_BYTES: usize = 24;

/// Batch states for every check, plus the running totals the flush
/// thresholds are checked against.
#[derive(Debug)]
pub struct BatchBuilder {
    states: HashMap<CheckId, BatchState>,
    hostname: String,
    max_capacity: usize,
    element_count: usize,
    byte_size: usize,
    envelope_size: usize,
}

impl BatchBuilder {
    pub fn new(hostname: impl Into<String>, max_capacity: usize) -> Self {
        let hostname = hostname.into();
        let envelope_size = encoded_len(&IntakePayload::new(hostname.as_str()));
        Self {
            states: HashMap::new(),
            hostname,
            max_capacity,
            element_count: 0,
            byte_size: 0,
            envelope_size,
        }
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Bytes added since the last flush, as passed to [`BatchBuilder::add`].
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Encoded size of a payload with no items in it.
    pub fn envelope_size(&self) -> usize {
        self.envelope_size
    }

    /// Upper bound on the encoded size of the payload a flush would send now.
    pub fn payload_size(&self) -> usize {
        self.envelope_size + self.byte_size
    }

    /// Bytes `submission` adds to the payload. `encoded` is its own encoded
    /// size; on top of that come the array separator, the topology or health
    /// wrapper when the check has none for that instance or stream yet, and
    /// health snapshot metadata.
    pub fn added_size(&self, check_id: &str, submission: &Submission, encoded: usize) -> usize {
        let state = self.states.get(check_id);
        let wrapper = match submission {
            Submission::StartSnapshot { instance }
            | Submission::StopSnapshot { instance }
            | Submission::Component { instance, .. }
            | Submission::Relation { instance, .. }
            | Submission::Delete { instance, .. } => {
                if state.is_some_and(|s| s.topologies.iter().any(|t| t.instance == *instance)) {
                    0
                } else {
                    encoded_len(&Topology::new(instance.clone())) + 1
                }
            }
            Submission::HealthCheckData { stream, .. }
            | Submission::HealthStartSnapshot { stream, .. }
            | Submission::HealthStopSnapshot { stream } => {
                if state.is_some_and(|s| s.health.iter().any(|h| h.stream == *stream)) {
                    0
                } else {
                    encoded_len(&Health::new(stream.clone())) + 1
                }
            }
            Submission::RawMetric(_) | Submission::Event(_) => 0,
        };
        let marker = match submission {
            Submission::HealthStartSnapshot {
                repeat_interval_s,
                expiry_interval_s,
                ..
            } => {
                encoded_len(&StartSnapshotMetadata {
                    repeat_interval_s: *repeat_interval_s,
                    expiry_interval_s: *expiry_interval_s,
                }) + MARKER_FIELD_BYTES
            }
            Submission::HealthStopSnapshot { .. } => {
                encoded_len(&StopSnapshotMetadata {}) + MARKER_FIELD_BYTES
            }
            _ => 0,
        };
        encoded + 1 + wrapper + marker
    }

    pub fn is_flushable(&self) -> bool {
        self.states.values().any(BatchState::is_flushable)
    }

    pub fn has_data(&self, check_id: &str) -> bool {
        self.states.get(check_id).is_some_and(BatchState::has_data)
    }

    /// Transaction the check's current batch belongs to, if any.
    pub fn transaction_of(&self, check_id: &str) -> Option<&BatchTransaction> {
        self.states.get(check_id)?.transaction.as_ref()
    }

    /// Open an empty batch for a transaction.
    pub fn start(&mut self, check_id: &str, transaction_id: &str) {
        self.remove(check_id);
        self.states.insert(
            check_id.to_string(),
            BatchState::for_transaction(Some(transaction_id)),
        );
    }

    /// Add one submission. `size` is its encoded size in bytes. Returns true
    /// once the element count has reached capacity.
    pub fn add(
        &mut self,
        check_id: &str,
        transaction_id: Option<&str>,
        submission: Submission,
        size: usize,
    ) -> bool {
        let counts = submission.counts_toward_capacity();
        let state = self
            .states
            .entry(check_id.to_string())
            .or_insert_with(|| BatchState::for_transaction(transaction_id));

        match submission {
            Submission::StartSnapshot { instance } => state.topology(instance).start_snapshot = true,
            Submission::StopSnapshot { instance } => state.topology(instance).stop_snapshot = true,
            Submission::Component {
                instance,
                component,
            } => state.topology(instance).components.push(component),
            Submission::Relation { instance, relation } => {
                state.topology(instance).relations.push(relation)
            }
            Submission::Delete { instance, id } => state.topology(instance).delete_ids.push(id),
            Submission::HealthCheckData { stream, data } => {
                state.health(stream).check_states.push(data)
            }
            Submission::HealthStartSnapshot {
                stream,
                repeat_interval_s,
                expiry_interval_s,
            } => {
                state.health(stream).start_snapshot = Some(StartSnapshotMetadata {
                    repeat_interval_s,
                    expiry_interval_s,
                })
            }
            Submission::HealthStopSnapshot { stream } => {
                state.health(stream).stop_snapshot = Some(StopSnapshotMetadata {})
            }
            Submission::RawMetric(mut metric) => {
                if metric.host_name.is_empty() {
                    metric.host_name = self.hostname.clone();
                }
                state.metrics.push(metric)
            }
            Submission::Event(event) => state.events.push(event),
        }

        state.bytes += size;
        self.byte_size += size;
        if counts {
            state.elements += 1;
            self.element_count += 1;
        }
        self.element_count >= self.max_capacity
    }

    /// Mark the check's transaction complete, creating an item-less state if
    /// everything was already flushed.
    pub fn mark_complete(&mut self, check_id: &str, transaction_id: &str) {
        let state = self
            .states
            .entry(check_id.to_string())
            .or_insert_with(|| BatchState::for_transaction(Some(transaction_id)));
        state
            .transaction
            .get_or_insert_with(|| BatchTransaction {
                transaction_id: transaction_id.to_string(),
                completed: false,
            })
            .completed = true;
    }

    /// Drop a check's state without emitting anything.
    pub fn remove(&mut self, check_id: &str) -> Option<BatchState> {
        let state = self.states.remove(check_id)?;
        self.element_count = self.element_count.saturating_sub(state.elements);
        self.byte_size = self.byte_size.saturating_sub(state.bytes);
        Some(state)
    }

    /// Take every flushable state and reset the totals. Empty states are
    /// discarded.
    pub fn take_all(&mut self) -> Vec<(CheckId, BatchState)> {
        self.element_count = 0;
        self.byte_size = 0;
        let mut states: Vec<_> = self
            .states
            .drain()
            .filter(|(_, state)| state.is_flushable())
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Take one check's state, if it has anything to flush.
    pub fn take(&mut self, check_id: &str) -> Option<BatchState> {
        self.remove(check_id).filter(BatchState::is_flushable)
    }

    pub fn summary(&self, check_id: &str) -> Option<BatchSummary> {
        let state = self.states.get(check_id)?;
        Some(BatchSummary {
            transaction: state.transaction.clone(),
            elements: state.elements,
            topologies: state.topologies.len(),
            components: state.topologies.iter().map(|t| t.components.len()).sum(),
            health_streams: state.health.len(),
            metrics: state.metrics.len(),
            events: state.events.len(),
        })
    }
}

fn encoded_len(value: &impl Serialize) -> usize {
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len())
}

/// Merge batch states into one intake payload.
pub fn build_payload<'a>(
    hostname: &str,
    states: impl IntoIterator<Item = &'a BatchState>,
) -> IntakePayload {
    let mut payload = IntakePayload::new(hostname);
    for state in states {
        payload.topologies.extend(state.topologies.iter().cloned());
        payload.health.extend(state.health.iter().cloned());
        payload
            .metrics
            .extend(state.metrics.iter().map(RawMetric::to_intake));
        payload.events.extend(state.events.iter().cloned());
    }
    payload
}
