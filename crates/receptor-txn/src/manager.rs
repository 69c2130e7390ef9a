//! TransactionManager handle and its single-writer loop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use receptor_core::{ActionId, AgentConfig, CheckId, PendingState, TransactionId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{TxError, TxResult};
use crate::types::{Action, Transaction, TransactionStatus, TxNotification};

/// Reason attached to the rollbacks sent when the manager shuts down.
pub const STOPPED_REASON: &str = "transaction manager stopped";

#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    /// Bound on the inbound message queue.
    pub channel_buffer: usize,
    /// Housekeeping period.
    pub tick_interval: Duration,
    /// Idle time after which an in-progress transaction becomes stale.
    pub timeout: Duration,
    /// Idle time after which a stale transaction is evicted.
    pub eviction_timeout: Duration,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 100,
            tick_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5 * 60),
            eviction_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl TransactionManagerConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            channel_buffer: config.transaction_channel_buffer,
            tick_interval: config.transaction_tick_interval,
            timeout: config.transaction_timeout,
            eviction_timeout: config.transaction_eviction_timeout,
        }
    }
}

#[derive(Debug)]
enum TxMessage {
    Start {
        check_id: CheckId,
        transaction_id: TransactionId,
        notify: mpsc::Sender<TxNotification>,
    },
    CommitAction {
        transaction_id: TransactionId,
        action_id: ActionId,
    },
    AckAction {
        transaction_id: TransactionId,
        action_id: ActionId,
    },
    RejectAction {
        transaction_id: TransactionId,
        action_id: ActionId,
        reason: String,
    },
    Complete {
        transaction_id: TransactionId,
    },
    SetState {
        transaction_id: TransactionId,
        state: PendingState,
    },
    Rollback {
        transaction_id: TransactionId,
        reason: String,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

type TransactionMap = Arc<Mutex<HashMap<TransactionId, Transaction>>>;

/// Handle to the transaction manager loop. Cheap to clone.
#[derive(Clone)]
pub struct TransactionManager {
    tx: mpsc::Sender<TxMessage>,
    transactions: TransactionMap,
}

impl TransactionManager {
    /// Spawn the manager loop on the current runtime.
    pub fn start(config: TransactionManagerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let transactions: TransactionMap = Arc::new(Mutex::new(HashMap::new()));

        let event_loop = TxLoop {
            config,
            transactions: transactions.clone(),
            follow_ups: VecDeque::new(),
        };
        tokio::spawn(event_loop.run(rx));

        Self { tx, transactions }
    }

    /// Open a transaction. Outcomes are delivered on `notify`.
    pub async fn start_transaction(
        &self,
        check_id: &str,
        transaction_id: &str,
        notify: mpsc::Sender<TxNotification>,
    ) -> TxResult<()> {
        self.send(TxMessage::Start {
            check_id: check_id.to_string(),
            transaction_id: transaction_id.to_string(),
            notify,
        })
        .await
    }

    pub async fn commit_action(&self, transaction_id: &str, action_id: &str) -> TxResult<()> {
        self.send(TxMessage::CommitAction {
            transaction_id: transaction_id.to_string(),
            action_id: action_id.to_string(),
        })
        .await
    }

    pub async fn ack_action(&self, transaction_id: &str, action_id: &str) -> TxResult<()> {
        self.send(TxMessage::AckAction {
            transaction_id: transaction_id.to_string(),
            action_id: action_id.to_string(),
        })
        .await
    }

    pub async fn reject_action(
        &self,
        transaction_id: &str,
        action_id: &str,
        reason: impl Into<String>,
    ) -> TxResult<()> {
        self.send(TxMessage::RejectAction {
            transaction_id: transaction_id.to_string(),
            action_id: action_id.to_string(),
            reason: reason.into(),
        })
        .await
    }

    pub async fn complete_transaction(&self, transaction_id: &str) -> TxResult<()> {
        self.send(TxMessage::Complete {
            transaction_id: transaction_id.to_string(),
        })
        .await
    }

    /// Attach state to be committed if the transaction succeeds. Replaces
    /// any state set earlier in the same transaction.
    pub async fn set_state(
        &self,
        transaction_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> TxResult<()> {
        self.send(TxMessage::SetState {
            transaction_id: transaction_id.to_string(),
            state: PendingState::new(key, value),
        })
        .await
    }

    pub async fn rollback(&self, transaction_id: &str, reason: impl Into<String>) -> TxResult<()> {
        self.send(TxMessage::Rollback {
            transaction_id: transaction_id.to_string(),
            reason: reason.into(),
        })
        .await
    }

    /// Abandon a transaction on behalf of its check. Same effect as a rollback.
    pub async fn discard_transaction(
        &self,
        transaction_id: &str,
        reason: impl Into<String>,
    ) -> TxResult<()> {
        self.rollback(transaction_id, reason).await
    }

    /// Stop the loop and wait for it to drop its transactions.
    pub async fn stop(&self) -> TxResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(TxMessage::Stop { done: done_tx }).await?;
        done_rx.await.map_err(|_| TxError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Snapshot of a transaction, for diagnostics and tests.
    pub fn get_transaction(&self, transaction_id: &str) -> TxResult<Transaction> {
        lock(&self.transactions)
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| TxError::TransactionNotFound(transaction_id.to_string()))
    }

    pub fn transaction_count(&self) -> usize {
        lock(&self.transactions).len()
    }

    async fn send(&self, msg: TxMessage) -> TxResult<()> {
        self.tx.send(msg).await.map_err(|_| TxError::NotRunning)
    }
}

fn lock(map: &TransactionMap) -> MutexGuard<'_, HashMap<TransactionId, Transaction>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TxLoop {
    config: TransactionManagerConfig,
    transactions: TransactionMap,
    /// Messages the loop generates for itself (rollbacks after a reject or an
    /// incomplete commit). Drained before the inbound queue is read again.
    follow_ups: VecDeque<TxMessage>,
}

impl TxLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<TxMessage>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            tick = ?self.config.tick_interval,
            timeout = ?self.config.timeout,
            eviction_timeout = ?self.config.eviction_timeout,
            "transaction manager started"
        );

        loop {
            let msg = match self.follow_ups.pop_front() {
                Some(msg) => msg,
                None => {
                    tokio::select! {
                        msg = rx.recv() => match msg {
                            Some(msg) => msg,
                            None => {
                                info!("transaction manager queue closed");
                                self.shutdown();
                                break;
                            }
                        },
                        _ = ticker.tick() => {
                            self.housekeeping();
                            continue;
                        }
                    }
                }
            };

            if let TxMessage::Stop { done } = msg {
                self.shutdown();
                let _ = done.send(());
                break;
            }
            self.handle(msg);
        }

        info!("transaction manager stopped");
    }

    fn handle(&mut self, msg: TxMessage) {
        let mut transactions = lock(&self.transactions);
        match msg {
            TxMessage::Start {
                check_id,
                transaction_id,
                notify,
            } => {
                debug!(%check_id, %transaction_id, "transaction started");
                let txn = Transaction::new(transaction_id.clone(), check_id, notify);
                if transactions.insert(transaction_id.clone(), txn).is_some() {
                    warn!(%transaction_id, "transaction restarted, previous entry replaced");
                }
            }

            TxMessage::CommitAction {
                transaction_id,
                action_id,
            } => {
                let Some(txn) = transactions.get_mut(&transaction_id) else {
                    error!(error = %TxError::TransactionNotFound(transaction_id), "commit action");
                    return;
                };
                txn.touch();
                txn.actions
                    .insert(action_id.clone(), Action::new(action_id.clone()));
                debug!(%transaction_id, %action_id, "action committed");
            }

            TxMessage::AckAction {
                transaction_id,
                action_id,
            } => match find_action(&mut transactions, &transaction_id, &action_id) {
                Ok(txn) => {
                    txn.touch();
                    if let Some(action) = txn.actions.get_mut(&action_id) {
                        action.acknowledge();
                    }
                    debug!(%transaction_id, %action_id, "action acknowledged");
                }
                Err(e) => error!(error = %e, "ack action"),
            },

            TxMessage::RejectAction {
                transaction_id,
                action_id,
                reason,
            } => match find_action(&mut transactions, &transaction_id, &action_id) {
                Ok(txn) => {
                    txn.touch();
                    if let Some(action) = txn.actions.get_mut(&action_id) {
                        action.acknowledge();
                    }
                    warn!(%transaction_id, %action_id, %reason, "action rejected");
                    self.follow_ups.push_back(TxMessage::Rollback {
                        reason: format!(
                            "rejected action {action_id} for transaction {transaction_id}: {reason}"
                        ),
                        transaction_id,
                    });
                }
                Err(e) => error!(error = %e, "reject action"),
            },

            TxMessage::Complete { transaction_id } => {
                let Some(txn) = transactions.get_mut(&transaction_id) else {
                    error!(error = %TxError::TransactionNotFound(transaction_id), "complete transaction");
                    return;
                };
                if txn.status.is_terminal() {
                    warn!(%transaction_id, status = %txn.status, "complete for finished transaction ignored");
                    return;
                }
                if !txn.all_acknowledged() {
                    let pending = txn.actions.values().filter(|a| !a.acknowledged).count();
                    warn!(%transaction_id, pending, "complete with unacknowledged actions");
                    self.follow_ups.push_back(TxMessage::Rollback {
                        reason: format!(
                            "transaction {transaction_id} completed but not all acknowledged: {pending} action(s) pending"
                        ),
                        transaction_id,
                    });
                    return;
                }
                txn.touch();
                txn.status = TransactionStatus::Succeeded;
                info!(%transaction_id, actions = txn.actions.len(), "transaction succeeded");
                notify(
                    txn,
                    TxNotification::Complete {
                        transaction_id: transaction_id.clone(),
                        state: txn.pending_state.clone(),
                    },
                );
            }

            TxMessage::SetState {
                transaction_id,
                state,
            } => {
                let Some(txn) = transactions.get_mut(&transaction_id) else {
                    error!(error = %TxError::TransactionNotFound(transaction_id), "set transaction state");
                    return;
                };
                txn.touch();
                debug!(%transaction_id, key = %state.key, "pending state attached");
                txn.pending_state = Some(state);
            }

            TxMessage::Rollback {
                transaction_id,
                reason,
            } => {
                let Some(txn) = transactions.get_mut(&transaction_id) else {
                    error!(error = %TxError::TransactionNotFound(transaction_id), "rollback");
                    return;
                };
                match txn.status {
                    TransactionStatus::Failed => {
                        debug!(%transaction_id, "rollback for failed transaction ignored");
                        return;
                    }
                    // The check was already told it succeeded; only the record changes.
                    TransactionStatus::Succeeded => {
                        txn.touch();
                        txn.status = TransactionStatus::Failed;
                        warn!(%transaction_id, %reason, "succeeded transaction marked failed");
                        return;
                    }
                    TransactionStatus::InProgress | TransactionStatus::Stale => {}
                }
                txn.touch();
                txn.status = TransactionStatus::Failed;
                warn!(%transaction_id, %reason, "transaction rolled back");
                notify(
                    txn,
                    TxNotification::Rollback {
                        transaction_id: transaction_id.clone(),
                        reason,
                    },
                );
            }

            // Handled by `run` before dispatch.
            TxMessage::Stop { .. } => {}
        }
    }

    fn housekeeping(&mut self) {
        let timeout = self.config.timeout;
        let eviction_timeout = self.config.eviction_timeout;
        let mut transactions = lock(&self.transactions);

        transactions.retain(|transaction_id, txn| {
            let idle = txn.last_updated.elapsed();
            match txn.status {
                TransactionStatus::Succeeded | TransactionStatus::Failed => {
                    debug!(%transaction_id, status = %txn.status, "finished transaction removed");
                    false
                }
                TransactionStatus::InProgress if idle > timeout => {
                    info!(%transaction_id, ?idle, "transaction is stale");
                    txn.status = TransactionStatus::Stale;
                    true
                }
                TransactionStatus::Stale if idle > eviction_timeout => {
                    warn!(%transaction_id, check_id = %txn.check_id, ?idle, "evicting stale transaction");
                    notify(
                        txn,
                        TxNotification::Evicted {
                            transaction_id: transaction_id.clone(),
                        },
                    );
                    false
                }
                _ => true,
            }
        });
    }

    fn shutdown(&mut self) {
        let mut transactions = lock(&self.transactions);
        for (transaction_id, txn) in transactions.drain() {
            if !txn.status.is_terminal() {
                notify(
                    &txn,
                    TxNotification::Rollback {
                        transaction_id,
                        reason: STOPPED_REASON.to_string(),
                    },
                );
            }
        }
        self.follow_ups.clear();
    }
}

fn find_action<'a>(
    transactions: &'a mut HashMap<TransactionId, Transaction>,
    transaction_id: &str,
    action_id: &str,
) -> TxResult<&'a mut Transaction> {
    let txn = transactions
        .get_mut(transaction_id)
        .ok_or_else(|| TxError::TransactionNotFound(transaction_id.to_string()))?;
    if !txn.actions.contains_key(action_id) {
        return Err(TxError::ActionNotFound {
            transaction_id: transaction_id.to_string(),
            action_id: action_id.to_string(),
        });
    }
    Ok(txn)
}

/// Post a notification without ever blocking the loop.
fn notify(txn: &Transaction, notification: TxNotification) {
    if let Err(e) = txn.notify.try_send(notification) {
        match e {
            mpsc::error::TrySendError::Full(n) => error!(
                transaction_id = %n.transaction_id(),
                check_id = %txn.check_id,
                "notification queue full, notification dropped"
            ),
            mpsc::error::TrySendError::Closed(n) => warn!(
                transaction_id = %n.transaction_id(),
                check_id = %txn.check_id,
                "check handler gone, notification dropped"
            ),
        }
    }
}
