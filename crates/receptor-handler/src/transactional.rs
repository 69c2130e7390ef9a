//! Transactional check handler.
//!
//! One loop per check. The loop is either idle or has exactly one open
//! transaction; operations from the check are applied to that transaction
//! in the order they were sent. A `StartTransaction` that arrives while a
//! transaction is open is held back, and nothing after it is read, until
//! the open transaction reaches a terminal notification.

use std::sync::Arc;

use receptor_core::{CheckId, Submission, TransactionId};
use receptor_txn::TxNotification;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{CheckConfig, HandlerContext};
use crate::error::{HandlerError, HandlerResult};

pub const HANDLER_STOPPED_REASON: &str = "check handler stopped";

#[derive(Debug)]
enum HandlerOp {
    StartTransaction { transaction_id: TransactionId },
    StopTransaction,
    DiscardTransaction { reason: String },
    SetTransactionState { key: String, value: String },
    Submit(Submission),
    SubmitComplete,
}

impl HandlerOp {
    fn name(&self) -> &'static str {
        match self {
            HandlerOp::StartTransaction { .. } => "start_transaction",
            HandlerOp::StopTransaction => "stop_transaction",
            HandlerOp::DiscardTransaction { .. } => "discard_transaction",
            HandlerOp::SetTransactionState { .. } => "set_transaction_state",
            HandlerOp::Submit(submission) => submission.kind(),
            HandlerOp::SubmitComplete => "submit_complete",
        }
    }
}

/// Handle to a transactional check handler loop. Cheap to clone.
#[derive(Clone)]
pub struct TransactionalHandler {
    config: Arc<CheckConfig>,
    context: HandlerContext,
    ops: mpsc::Sender<HandlerOp>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
    current: watch::Receiver<Option<TransactionId>>,
}

impl TransactionalHandler {
    /// Spawn the handler loop for `config.check_id`.
    pub fn start(config: CheckConfig, context: HandlerContext) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(context.channel_buffer.max(1));
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (notify_tx, notify_rx) = mpsc::channel(context.notification_buffer());
        let (current_tx, current_rx) = watch::channel(None);

        let event_loop = HandlerLoop {
            check_id: config.check_id.clone(),
            context: context.clone(),
            notify: notify_tx,
            current: current_tx,
            pending_start: None,
        };
        tokio::spawn(event_loop.run(ops_rx, notify_rx, stop_rx));

        Self {
            config: Arc::new(config),
            context,
            ops: ops_tx,
            stop: stop_tx,
            current: current_rx,
        }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Request a new transaction and return its id. The transaction opens
    /// once any transaction already in flight for this check has finished.
    pub async fn start_transaction(&self) -> HandlerResult<TransactionId> {
        let transaction_id = Uuid::new_v4().to_string();
        self.send(HandlerOp::StartTransaction {
            transaction_id: transaction_id.clone(),
        })
        .await?;
        Ok(transaction_id)
    }

    /// Mark the current transaction's data complete.
    pub async fn stop_transaction(&self) -> HandlerResult<()> {
        self.send(HandlerOp::StopTransaction).await
    }

    pub async fn discard_transaction(&self, reason: impl Into<String>) -> HandlerResult<()> {
        self.send(HandlerOp::DiscardTransaction {
            reason: reason.into(),
        })
        .await
    }

    /// Stage state to be committed when the current transaction succeeds.
    pub async fn set_transaction_state(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> HandlerResult<()> {
        self.send(HandlerOp::SetTransactionState {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    pub async fn submit(&self, submission: Submission) -> HandlerResult<()> {
        self.send(HandlerOp::Submit(submission)).await
    }

    pub async fn submit_complete(&self) -> HandlerResult<()> {
        self.send(HandlerOp::SubmitComplete).await
    }

    /// Write state directly. A failed write discards the current transaction.
    pub async fn set_state(&self, key: &str, value: &str) -> HandlerResult<()> {
        if let Err(e) = self.context.state.set(key, value) {
            let reason = format!("failed to set state for {key}: {e}");
            error!(check_id = %self.config.check_id, %key, error = %e, "failed to set check state");
            if let Err(send_err) = self.discard_transaction(reason).await {
                debug!(check_id = %self.config.check_id, error = %send_err, "could not discard transaction");
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> String {
        self.context.state.get_or_default(key)
    }

    /// Id of the open transaction, if any.
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.current.borrow().clone()
    }

    /// Stop the loop. An open transaction is discarded and its batch dropped.
    pub async fn stop(&self) -> HandlerResult<()> {
        let (done, rx) = oneshot::channel();
        self.stop
            .send(done)
            .await
            .map_err(|_| HandlerError::Stopped)?;
        rx.await.map_err(|_| HandlerError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.ops.is_closed()
    }

    async fn send(&self, op: HandlerOp) -> HandlerResult<()> {
        self.ops.send(op).await.map_err(|_| HandlerError::Stopped)
    }
}

struct HandlerLoop {
    check_id: CheckId,
    context: HandlerContext,
    /// Handed to the transaction manager with every transaction.
    notify: mpsc::Sender<TxNotification>,
    current: watch::Sender<Option<TransactionId>>,
    pending_start: Option<TransactionId>,
}

impl HandlerLoop {
    async fn run(
        mut self,
        mut ops: mpsc::Receiver<HandlerOp>,
        mut notifications: mpsc::Receiver<TxNotification>,
        mut stop: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        info!(check_id = %self.check_id, "transactional check handler started");

        let mut stopped_by = None;
        loop {
            if self.current_id().is_none() {
                if let Some(transaction_id) = self.pending_start.take() {
                    self.open(transaction_id).await;
                    continue;
                }
            }
            let open = self.current_id().is_some();
            let accepting = self.pending_start.is_none();

            tokio::select! {
                biased;
                done = stop.recv() => {
                    self.shutdown().await;
                    stopped_by = done;
                    break;
                }
                op = ops.recv(), if accepting => {
                    let Some(op) = op else {
                        self.shutdown().await;
                        break;
                    };
                    self.handle_op(op).await;
                }
                Some(notification) = notifications.recv(), if open => {
                    self.handle_notification(notification).await;
                }
            }
        }

        // Close the queues before acknowledging the stop.
        drop(ops);
        drop(stop);
        info!(check_id = %self.check_id, "transactional check handler stopped");
        if let Some(done) = stopped_by {
            let _ = done.send(());
        }
    }

    fn current_id(&self) -> Option<TransactionId> {
        self.current.borrow().clone()
    }

    async fn open(&mut self, transaction_id: TransactionId) {
        let check_id = &self.check_id;
        if let Err(e) = self
            .context
            .transactions
            .start_transaction(check_id, &transaction_id, self.notify.clone())
            .await
        {
            error!(%check_id, %transaction_id, error = %e, "failed to start transaction");
            return;
        }
        if let Err(e) = self
            .context
            .batcher
            .start_transaction(check_id, &transaction_id)
            .await
        {
            error!(%check_id, %transaction_id, error = %e, "failed to open batch");
        }
        info!(%check_id, %transaction_id, "transaction started");
        self.current.send_replace(Some(transaction_id));
    }

    async fn handle_op(&mut self, op: HandlerOp) {
        let check_id = self.check_id.clone();

        if let HandlerOp::StartTransaction { transaction_id } = op {
            match self.current_id() {
                Some(current) => {
                    debug!(%check_id, %current, queued = %transaction_id, "transaction queued behind open transaction");
                    self.pending_start = Some(transaction_id);
                }
                None => self.open(transaction_id).await,
            }
            return;
        }

        let Some(transaction_id) = self.current_id() else {
            match op {
                HandlerOp::SubmitComplete => debug!(%check_id, "check run complete"),
                op => warn!(%check_id, op = op.name(), "no open transaction, dropped"),
            }
            return;
        };

        let result = match op {
            HandlerOp::StopTransaction => {
                debug!(%check_id, %transaction_id, "stopping transaction");
                self.context
                    .batcher
                    .stop_transaction(&check_id, &transaction_id)
                    .await
                    .map_err(|e| e.to_string())
            }
            HandlerOp::DiscardTransaction { reason } => {
                debug!(%check_id, %transaction_id, %reason, "discarding transaction");
                self.context
                    .transactions
                    .discard_transaction(&transaction_id, reason)
                    .await
                    .map_err(|e| e.to_string())
            }
            HandlerOp::SetTransactionState { key, value } => {
                debug!(%check_id, %transaction_id, %key, "staging transaction state");
                self.context
                    .transactions
                    .set_state(&transaction_id, key, value)
                    .await
                    .map_err(|e| e.to_string())
            }
            HandlerOp::Submit(submission) => self
                .context
                .batcher
                .submit(&check_id, &transaction_id, submission)
                .await
                .map_err(|e| e.to_string()),
            HandlerOp::SubmitComplete => {
                debug!(%check_id, %transaction_id, "check run complete");
                Ok(())
            }
            // Handled above.
            HandlerOp::StartTransaction { .. } => Ok(()),
        };
        if let Err(e) = result {
            error!(%check_id, %transaction_id, error = %e, "failed to apply check operation");
        }
    }

    async fn handle_notification(&mut self, notification: TxNotification) {
        let check_id = self.check_id.clone();
        let Some(current) = self.current_id() else {
            return;
        };
        if notification.transaction_id() != current {
            warn!(
                %check_id,
                %current,
                transaction_id = notification.transaction_id(),
                "notification for a transaction that is not current, ignored"
            );
            return;
        }

        match notification {
            TxNotification::Complete {
                transaction_id,
                state,
            } => {
                if let Some(state) = state {
                    if let Err(e) = self.context.state.set(&state.key, &state.value) {
                        let reason = format!(
                            "failed to commit state {} for transaction {transaction_id}: {e}",
                            state.key
                        );
                        error!(%check_id, %transaction_id, key = %state.key, error = %e, "failed to commit transaction state");
                        self.discard_failed_commit(transaction_id, reason).await;
                        return;
                    }
                    debug!(%check_id, %transaction_id, key = %state.key, "transaction state committed");
                }
                info!(%check_id, %transaction_id, "transaction completed");
                self.current.send_replace(None);
            }
            TxNotification::Rollback {
                transaction_id,
                reason,
            } => {
                warn!(%check_id, %transaction_id, %reason, "transaction rolled back");
                self.clear_batch().await;
                self.current.send_replace(None);
            }
            TxNotification::Evicted { transaction_id } => {
                warn!(%check_id, %transaction_id, "transaction evicted");
                self.clear_batch().await;
                self.current.send_replace(None);
            }
        }
    }

    /// The transaction already succeeded in the manager, so the rollback the
    /// handler waits for is queued on its own notification channel.
    async fn discard_failed_commit(&mut self, transaction_id: TransactionId, reason: String) {
        if let Err(e) = self
            .context
            .transactions
            .discard_transaction(&transaction_id, reason.clone())
            .await
        {
            debug!(check_id = %self.check_id, %transaction_id, error = %e, "could not discard transaction");
        }
        let rollback = TxNotification::Rollback {
            transaction_id,
            reason,
        };
        if let Err(e) = self.notify.try_send(rollback) {
            error!(check_id = %self.check_id, error = %e, "failed to queue rollback, clearing transaction");
            self.clear_batch().await;
            self.current.send_replace(None);
        }
    }

    async fn clear_batch(&self) {
        if let Err(e) = self.context.batcher.clear_state(&self.check_id).await {
            error!(check_id = %self.check_id, error = %e, "failed to clear batch state");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(transaction_id) = self.current.send_replace(None) {
            self.clear_batch().await;
            if let Err(e) = self
                .context
                .transactions
                .discard_transaction(&transaction_id, HANDLER_STOPPED_REASON)
                .await
            {
                debug!(check_id = %self.check_id, %transaction_id, error = %e, "could not discard transaction");
            }
        }
        if let Some(transaction_id) = self.pending_start.take() {
            debug!(check_id = %self.check_id, %transaction_id, "queued transaction dropped");
        }
    }
}
