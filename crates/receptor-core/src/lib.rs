//! receptor-core — shared domain model for the Receptor ingestion core.
//!
//! Everything that crosses a loop boundary lives here: identifiers, the
//! topology / health / telemetry records a check produces, the single
//! [`Submission`] message shared by check handlers and batchers, the intake
//! payload wire shape, and the agent configuration.
//!
//! # Layout
//!
//! ```text
//! receptor-core
//!   ├── types       CheckId, TransactionId, ActionId, PendingState
//!   ├── topology    Instance, Component, Relation, Topology
//!   ├── health      Stream, CheckData, Health
//!   ├── telemetry   RawMetric, Event
//!   ├── submission  Submission (one variant per check operation)
//!   ├── payload     IntakePayload, PayloadTransaction
//!   └── config      AgentConfig (TOML) + duration parsing
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod payload;
pub mod submission;
pub mod telemetry;
pub mod topology;
pub mod types;

pub use config::{AgentConfig, ProxyConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use health::{CheckData, Health, StartSnapshotMetadata, StopSnapshotMetadata, Stream};
pub use payload::{IntakePayload, PayloadTransaction};
pub use submission::Submission;
pub use telemetry::{Event, EventContext, RawMetric, SourceLink};
pub use topology::{Component, ComponentType, Instance, Relation, Topology};
pub use types::*;
