//! receptor-forwarder — payload delivery for Receptor.
//!
//! The forwarder loop takes serialized payloads from the batcher, hands them
//! to a [`Transport`] and turns the outcome into transaction traffic: every
//! action in a delivered payload is acknowledged (and its transaction
//! completed when the payload carries the final action); every action in a
//! failed payload is rejected. Retrying is the transport's job.

pub mod error;
pub mod forwarder;
pub mod mask;
pub mod printing;
pub mod transport;

pub use error::{ForwarderError, ForwarderResult, TransportError};
pub use forwarder::{Forwarder, ForwarderConfig, TransactionalPayload};
pub use mask::mask_api_key;
pub use printing::PrintingTransport;
pub use transport::{HttpTransport, HttpTransportConfig, Transport};
