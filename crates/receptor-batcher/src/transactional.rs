//! Transactional batcher loop.

use std::collections::{HashMap, HashSet};

use receptor_core::{CheckId, PayloadTransaction, Submission, TransactionId};
use receptor_forwarder::{Forwarder, TransactionalPayload, mask_api_key};
use receptor_txn::TransactionManager;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::{BatchBuilder, BatchState, BatchSummary, build_payload};
use crate::config::BatcherConfig;
use crate::error::{BatcherError, BatcherResult};

pub const MARSHAL_ERROR_REASON: &str = "marshal error";
pub const MAX_ACTIONS_REASON: &str = "exceeded max actions";

#[derive(Debug)]
enum BatcherMessage {
    StartTransaction {
        check_id: CheckId,
        transaction_id: TransactionId,
    },
    Submit {
        check_id: CheckId,
        transaction_id: TransactionId,
        submission: Submission,
    },
    StopTransaction {
        check_id: CheckId,
        transaction_id: TransactionId,
    },
    ClearState {
        check_id: CheckId,
    },
    Flush,
    Inspect {
        check_id: CheckId,
        reply: oneshot::Sender<Option<BatchSummary>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the transactional batcher loop. Cheap to clone.
#[derive(Clone)]
pub struct Batcher {
    tx: mpsc::Sender<BatcherMessage>,
}

impl Batcher {
    pub fn start(
        config: BatcherConfig,
        transactions: TransactionManager,
        forwarder: Forwarder,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let event_loop = BatcherLoop {
            builder: BatchBuilder::new(config.hostname.clone(), config.max_capacity),
            config,
            transactions,
            forwarder,
            action_counts: HashMap::new(),
            open: HashMap::new(),
            failed: HashSet::new(),
        };
        tokio::spawn(event_loop.run(rx));
        Self { tx }
    }

    pub async fn start_transaction(&self, check_id: &str, transaction_id: &str) -> BatcherResult<()> {
        self.send(BatcherMessage::StartTransaction {
            check_id: check_id.to_string(),
            transaction_id: transaction_id.to_string(),
        })
        .await
    }

    pub async fn submit(
        &self,
        check_id: &str,
        transaction_id: &str,
        submission: Submission,
    ) -> BatcherResult<()> {
        self.send(BatcherMessage::Submit {
            check_id: check_id.to_string(),
            transaction_id: transaction_id.to_string(),
            submission,
        })
        .await
    }

    /// Mark the transaction's data complete and flush.
    pub async fn stop_transaction(&self, check_id: &str, transaction_id: &str) -> BatcherResult<()> {
        self.send(BatcherMessage::StopTransaction {
            check_id: check_id.to_string(),
            transaction_id: transaction_id.to_string(),
        })
        .await
    }

    /// Drop whatever the check has accumulated without sending it.
    pub async fn clear_state(&self, check_id: &str) -> BatcherResult<()> {
        self.send(BatcherMessage::ClearState {
            check_id: check_id.to_string(),
        })
        .await
    }

    pub async fn flush(&self) -> BatcherResult<()> {
        self.send(BatcherMessage::Flush).await
    }

    pub async fn inspect(&self, check_id: &str) -> BatcherResult<Option<BatchSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(BatcherMessage::Inspect {
            check_id: check_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BatcherError::NotRunning)
    }

    pub async fn stop(&self) -> BatcherResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(BatcherMessage::Stop { done }).await?;
        rx.await.map_err(|_| BatcherError::NotRunning)
    }

    async fn send(&self, msg: BatcherMessage) -> BatcherResult<()> {
        self.tx.send(msg).await.map_err(|_| BatcherError::NotRunning)
    }
}

struct BatcherLoop {
    config: BatcherConfig,
    builder: BatchBuilder,
    transactions: TransactionManager,
    forwarder: Forwarder,
    /// Actions committed so far per transaction.
    action_counts: HashMap<TransactionId, usize>,
    /// Transaction each check is currently batching for.
    open: HashMap<CheckId, TransactionId>,
    /// Checks whose transaction was failed here; their submissions are
    /// dropped until ClearState.
    failed: HashSet<CheckId>,
}

impl BatcherLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<BatcherMessage>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            max_capacity = self.config.max_capacity,
            max_message_size = self.config.max_message_size,
            flush_interval = ?self.config.flush_interval,
            "batcher started"
        );

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        info!("batcher queue closed");
                        break;
                    };
                    if let BatcherMessage::Stop { done } = msg {
                        let _ = done.send(());
                        break;
                    }
                    self.handle(msg).await;
                }
                _ = ticker.tick() => {
                    if self.builder.is_flushable() {
                        self.flush_all().await;
                    }
                }
            }
        }

        info!("batcher stopped");
    }

    async fn handle(&mut self, msg: BatcherMessage) {
        match msg {
            BatcherMessage::StartTransaction {
                check_id,
                transaction_id,
            } => {
                if let Some(previous) = self.builder.transaction_of(&check_id) {
                    if previous.transaction_id != transaction_id {
                        warn!(%check_id, previous = %previous.transaction_id, %transaction_id, "dropping batch of superseded transaction");
                    }
                }
                self.failed.remove(&check_id);
                self.builder.start(&check_id, &transaction_id);
                if let Some(old) = self.open.insert(check_id.clone(), transaction_id.clone()) {
                    if old != transaction_id {
                        self.action_counts.remove(&old);
                    }
                }
                debug!(%check_id, %transaction_id, "batch opened");
            }

            BatcherMessage::Submit {
                check_id,
                transaction_id,
                submission,
            } => self.submit(check_id, transaction_id, submission).await,

            BatcherMessage::StopTransaction {
                check_id,
                transaction_id,
            } => {
                if self.failed.contains(&check_id) {
                    debug!(%check_id, %transaction_id, "stop for failed transaction ignored");
                    return;
                }
                if !self.accepts(&check_id, &transaction_id) {
                    return;
                }
                self.builder.mark_complete(&check_id, &transaction_id);
                debug!(%check_id, %transaction_id, "transaction batch complete");
                self.flush_all().await;
            }

            BatcherMessage::ClearState { check_id } => {
                self.builder.remove(&check_id);
                self.failed.remove(&check_id);
                if let Some(transaction_id) = self.open.remove(&check_id) {
                    self.action_counts.remove(&transaction_id);
                }
                debug!(%check_id, "batch state cleared");
            }

            BatcherMessage::Flush => self.flush_all().await,

            BatcherMessage::Inspect { check_id, reply } => {
                let _ = reply.send(self.builder.summary(&check_id));
            }

            // Handled by `run` before dispatch.
            BatcherMessage::Stop { .. } => {}
        }
    }

    /// A check's traffic must belong to the transaction its batch is for.
    fn accepts(&self, check_id: &str, transaction_id: &str) -> bool {
        let current = self
            .builder
            .transaction_of(check_id)
            .map(|t| t.transaction_id.as_str())
            .or_else(|| self.open.get(check_id).map(String::as_str));
        match current {
            Some(current) if current != transaction_id => {
                warn!(%check_id, %current, %transaction_id, "submission for another transaction ignored");
                false
            }
            _ => true,
        }
    }

    async fn submit(&mut self, check_id: CheckId, transaction_id: TransactionId, submission: Submission) {
        if self.failed.contains(&check_id) {
            debug!(%check_id, %transaction_id, kind = submission.kind(), "submission for failed transaction dropped");
            return;
        }
        if !self.accepts(&check_id, &transaction_id) {
            return;
        }

        let encoded = match submission.encoded_size() {
            Ok(size) => size,
            Err(e) => {
                error!(%check_id, kind = submission.kind(), error = %e, "failed to encode submission, dropped");
                return;
            }
        };
        let max = self.config.max_message_size;
        let mut size = self.builder.added_size(&check_id, &submission, encoded);
        if self.builder.payload_size() + size > max && self.builder.is_flushable() {
            self.flush_all().await;
            size = self.builder.added_size(&check_id, &submission, encoded);
        }
        if self.builder.payload_size() + size > max {
            error!(
                %check_id,
                kind = submission.kind(),
                size,
                max,
                "submission larger than max message size, dropped"
            );
            return;
        }

        self.open.insert(check_id.clone(), transaction_id.clone());
        let full = self
            .builder
            .add(&check_id, Some(&transaction_id), submission, size);
        if full {
            self.flush_all().await;
        }
    }

    async fn flush_all(&mut self) {
        let states = self.builder.take_all();
        if states.is_empty() {
            return;
        }

        let max_actions = self.config.max_actions_per_transaction;
        let mut over_budget = Vec::new();
        let states: Vec<(CheckId, BatchState)> = states
            .into_iter()
            .filter(|(check_id, state)| match &state.transaction {
                Some(txn)
                    if self
                        .action_counts
                        .get(&txn.transaction_id)
                        .is_some_and(|committed| *committed >= max_actions) =>
                {
                    over_budget.push((check_id.clone(), txn.transaction_id.clone()));
                    false
                }
                _ => true,
            })
            .collect();
        for (check_id, transaction_id) in over_budget {
            warn!(%check_id, %transaction_id, max = max_actions, "transaction exceeded max actions");
            self.action_counts.remove(&transaction_id);
            self.fail(&check_id, &transaction_id, MAX_ACTIONS_REASON).await;
        }
        if states.is_empty() {
            return;
        }

        // Only data covered by a committed action goes into the payload.
        let mut actions = HashMap::new();
        let mut committed = Vec::with_capacity(states.len());
        for (check_id, state) in states {
            let Some(txn) = state.transaction.clone() else {
                committed.push((check_id, state));
                continue;
            };
            let action_id = Uuid::new_v4().to_string();
            if let Err(e) = self
                .transactions
                .commit_action(&txn.transaction_id, &action_id)
                .await
            {
                error!(%check_id, transaction_id = %txn.transaction_id, error = %e, "failed to commit action, batch dropped");
                continue;
            }
            *self
                .action_counts
                .entry(txn.transaction_id.clone())
                .or_default() += 1;
            if txn.completed {
                self.action_counts.remove(&txn.transaction_id);
                self.open.remove(&check_id);
            }
            debug!(%check_id, transaction_id = %txn.transaction_id, %action_id, completed = txn.completed, "action committed");
            actions.insert(
                txn.transaction_id.clone(),
                PayloadTransaction {
                    action_id,
                    completed: txn.completed,
                },
            );
            committed.push((check_id, state));
        }
        let states = committed;
        if states.is_empty() {
            return;
        }

        let payload = build_payload(&self.config.hostname, states.iter().map(|(_, s)| s));
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize payload");
                self.fail_batch(&states, MARSHAL_ERROR_REASON).await;
                return;
            }
        };

        if self.config.log_payloads {
            debug!(payload = %mask_api_key(&String::from_utf8_lossy(&body)), "flushing batch");
        }
        debug!(
            checks = states.len(),
            topologies = payload.topologies.len(),
            health = payload.health.len(),
            metrics = payload.metrics.len(),
            events = payload.events.len(),
            bytes = body.len(),
            "batch flushed"
        );

        let payload = TransactionalPayload {
            path: self.config.intake_path.clone(),
            body,
            transactions: actions,
        };
        if let Err(e) = self.forwarder.submit(payload).await {
            error!(error = %e, "failed to hand payload to forwarder");
        }
    }

    /// Roll back every transaction with data in `states`.
    async fn fail_batch(&mut self, states: &[(CheckId, BatchState)], reason: &str) {
        for (check_id, state) in states {
            if let Some(txn) = &state.transaction {
                self.action_counts.remove(&txn.transaction_id);
                self.fail(check_id, &txn.transaction_id, reason).await;
            }
        }
    }

    async fn fail(&mut self, check_id: &str, transaction_id: &str, reason: &str) {
        self.failed.insert(check_id.to_string());
        if let Err(e) = self.transactions.rollback(transaction_id, reason).await {
            error!(%check_id, %transaction_id, error = %e, "failed to roll back transaction");
        }
    }
}
