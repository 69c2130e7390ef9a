//! Forwarder handle and delivery loop.

use std::collections::HashMap;

use receptor_core::{AgentConfig, PayloadTransaction, TransactionId};
use receptor_txn::TransactionManager;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ForwarderError, ForwarderResult};
use crate::mask::mask_api_key;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub channel_buffer: usize,
    /// Log every payload body (API keys masked) at `debug`.
    pub log_payloads: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 100,
            log_payloads: false,
        }
    }
}

impl ForwarderConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            channel_buffer: config.forwarder_channel_buffer,
            log_payloads: config.log_payloads,
        }
    }
}

/// A serialized payload plus the action it represents for each transaction
/// whose data it carries.
#[derive(Debug, Clone)]
pub struct TransactionalPayload {
    pub path: String,
    pub body: Vec<u8>,
    pub transactions: HashMap<TransactionId, PayloadTransaction>,
}

/// Handle to the forwarder loop. Cheap to clone.
#[derive(Clone)]
pub struct Forwarder {
    tx: mpsc::Sender<TransactionalPayload>,
}

impl Forwarder {
    /// Spawn the forwarder loop. It exits when `shutdown` flips to true or
    /// every handle has been dropped.
    pub fn start<T: Transport>(
        config: ForwarderConfig,
        transport: T,
        transactions: TransactionManager,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let handle = tokio::spawn(run_forwarder_loop(
            transport,
            transactions,
            rx,
            shutdown,
            config.log_payloads,
        ));
        (Self { tx }, handle)
    }

    /// Queue a payload for delivery. Waits while the queue is full.
    pub async fn submit(&self, payload: TransactionalPayload) -> ForwarderResult<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| ForwarderError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn run_forwarder_loop<T: Transport>(
    transport: T,
    transactions: TransactionManager,
    mut rx: mpsc::Receiver<TransactionalPayload>,
    mut shutdown: watch::Receiver<bool>,
    log_payloads: bool,
) {
    info!("forwarder started");
    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(payload) = payload else {
                    info!("forwarder queue closed");
                    break;
                };
                deliver(&transport, &transactions, payload, log_payloads).await;
            }
            _ = shutdown.changed() => {
                info!("forwarder shutting down");
                break;
            }
        }
    }
}

async fn deliver<T: Transport>(
    transport: &T,
    transactions: &TransactionManager,
    payload: TransactionalPayload,
    log_payloads: bool,
) {
    let TransactionalPayload {
        path,
        body,
        transactions: actions,
    } = payload;

    if log_payloads {
        debug!(%path, body = %mask_api_key(&String::from_utf8_lossy(&body)), "sending payload");
    }

    match transport.post(&path, body).await {
        Ok(()) => {
            for (transaction_id, action) in &actions {
                if let Err(e) = transactions
                    .ack_action(transaction_id, &action.action_id)
                    .await
                {
                    error!(%transaction_id, action_id = %action.action_id, error = %e, "failed to acknowledge action");
                    continue;
                }
                if action.completed {
                    if let Err(e) = transactions.complete_transaction(transaction_id).await {
                        error!(%transaction_id, error = %e, "failed to complete transaction");
                    }
                }
            }
            debug!(%path, transactions = actions.len(), "payload acknowledged");
        }
        Err(e) => {
            warn!(%path, error = %e, transactions = actions.len(), "payload delivery failed");
            let reason = e.to_string();
            for (transaction_id, action) in &actions {
                if let Err(e) = transactions
                    .reject_action(transaction_id, &action.action_id, reason.clone())
                    .await
                {
                    error!(%transaction_id, action_id = %action.action_id, error = %e, "failed to reject action");
                }
            }
        }
    }
}
