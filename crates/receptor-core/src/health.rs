//! Health streams and their accumulated check states.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named health channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stream {
    pub urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_stream: Option<String>,
}

impl Stream {
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            sub_stream: None,
        }
    }

    pub fn with_sub_stream(mut self, sub_stream: impl Into<String>) -> Self {
        self.sub_stream = Some(sub_stream.into());
        self
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_stream {
            Some(sub) => write!(f, "{}:{}", self.urn, sub),
            None => f.write_str(&self.urn),
        }
    }
}

/// Opaque health record produced by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckData(pub Value);

impl From<Value> for CheckData {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSnapshotMetadata {
    pub repeat_interval_s: u32,
    pub expiry_interval_s: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopSnapshotMetadata {}

/// Accumulated health for one stream inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_snapshot: Option<StartSnapshotMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_snapshot: Option<StopSnapshotMetadata>,
    pub stream: Stream,
    pub check_states: Vec<CheckData>,
}

impl Health {
    pub fn new(stream: Stream) -> Self {
        Self {
            start_snapshot: None,
            stop_snapshot: None,
            stream,
            check_states: Vec::new(),
        }
    }
}
