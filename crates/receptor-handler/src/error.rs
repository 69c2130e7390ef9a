//! Error types for check handlers.

use receptor_state::StateError;
use receptor_txn::TxError;
use thiserror::Error;

/// Result type alias for check handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("check handler is stopped")]
    Stopped,

    #[error("check handler does not support transactions")]
    TransactionsUnsupported,

    #[error("transaction error: {0}")]
    Transaction(#[from] TxError),

    #[error("check state error: {0}")]
    State(#[from] StateError),
}
