//! Error types for the batchers.

use thiserror::Error;

pub type BatcherResult<T> = Result<T, BatcherError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatcherError {
    #[error("batcher is not running")]
    NotRunning,
}
