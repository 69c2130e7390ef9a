//! Identifiers and small value types shared by every loop.

use serde::{Deserialize, Serialize};

/// Identifier of a configured check instance. Stable across reloads.
pub type CheckId = String;

/// Identifier of a transaction, generated by the check handler.
pub type TransactionId = String;

/// Identifier of a single payload (action) inside a transaction.
pub type ActionId = String;

/// State to be committed to the check state store once a transaction succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub key: String,
    pub value: String,
}

impl PendingState {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
