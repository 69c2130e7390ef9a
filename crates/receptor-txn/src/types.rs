//! Transactions, actions and the notifications sent to check handlers.

use std::collections::HashMap;
use std::fmt;

use receptor_core::{ActionId, CheckId, PendingState, TransactionId};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    InProgress,
    Failed,
    Succeeded,
    Stale,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Succeeded)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::InProgress => "in_progress",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// One payload emitted for a transaction.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    pub committed_at: Instant,
    pub acknowledged: bool,
    pub acknowledged_at: Option<Instant>,
}

impl Action {
    pub(crate) fn new(id: ActionId) -> Self {
        Self {
            id,
            committed_at: Instant::now(),
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    /// Acknowledged only ever goes false → true.
    pub(crate) fn acknowledge(&mut self) {
        if !self.acknowledged {
            self.acknowledged = true;
            self.acknowledged_at = Some(Instant::now());
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub check_id: CheckId,
    pub status: TransactionStatus,
    pub actions: HashMap<ActionId, Action>,
    pub last_updated: Instant,
    pub pending_state: Option<PendingState>,
    pub(crate) notify: mpsc::Sender<TxNotification>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        check_id: CheckId,
        notify: mpsc::Sender<TxNotification>,
    ) -> Self {
        Self {
            id,
            check_id,
            status: TransactionStatus::InProgress,
            actions: HashMap::new(),
            last_updated: Instant::now(),
            pending_state: None,
            notify,
        }
    }

    /// Record activity. New traffic brings a stale transaction back.
    pub(crate) fn touch(&mut self) {
        self.last_updated = Instant::now();
        if self.status == TransactionStatus::Stale {
            self.status = TransactionStatus::InProgress;
        }
    }

    pub fn all_acknowledged(&self) -> bool {
        self.actions.values().all(|a| a.acknowledged)
    }
}

/// Outcome of a transaction, delivered to the owning check handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxNotification {
    Complete {
        transaction_id: TransactionId,
        state: Option<PendingState>,
    },
    Rollback {
        transaction_id: TransactionId,
        reason: String,
    },
    Evicted {
        transaction_id: TransactionId,
    },
}

impl TxNotification {
    pub fn transaction_id(&self) -> &str {
        match self {
            TxNotification::Complete { transaction_id, .. }
            | TxNotification::Rollback { transaction_id, .. }
            | TxNotification::Evicted { transaction_id } => transaction_id,
        }
    }
}
