//! Error types for the transaction manager.

use thiserror::Error;

/// Result type alias for transaction manager operations.
pub type TxResult<T> = Result<T, TxError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("action {action_id} not found in transaction {transaction_id}")]
    ActionNotFound {
        transaction_id: String,
        action_id: String,
    },

    #[error("transaction {transaction_id} rolled back: {reason}")]
    RollbackTransaction {
        transaction_id: String,
        reason: String,
    },

    #[error("transaction manager is not running")]
    NotRunning,
}
