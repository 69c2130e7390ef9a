//! Error types for payload delivery.

use thiserror::Error;

pub type ForwarderResult<T> = Result<T, ForwarderError>;

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("forwarder is not running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("receiver responded with HTTP {code}")]
    Status { code: u16 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] std::io::Error),

    #[error("transport misconfigured: {0}")]
    Config(String),
}
