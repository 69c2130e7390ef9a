//! Batcher for checks that do not use transactions.

use std::collections::HashMap;

use receptor_core::{CheckId, Submission};
use receptor_forwarder::{Forwarder, TransactionalPayload, mask_api_key};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::builder::{BatchBuilder, BatchSummary, build_payload};
use crate::config::BatcherConfig;
use crate::error::{BatcherError, BatcherResult};

#[derive(Debug)]
enum SimpleMessage {
    Submit {
        check_id: CheckId,
        submission: Submission,
    },
    SubmitComplete {
        check_id: CheckId,
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

/// Handle to the non-transactional batcher loop. Cheap to clone.
#[derive(Clone)]
pub struct SimpleBatcher {
    tx: mpsc::Sender<SimpleMessage>,
}

impl SimpleBatcher {
    pub fn start(config: BatcherConfig, forwarder: Forwarder) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let builder = BatchBuilder::new(config.hostname.clone(), config.max_capacity);
        tokio::spawn(run_simple_loop(config, builder, forwarder, rx));
        Self { tx }
    }

    pub async fn submit(&self, check_id: &str, submission: Submission) -> BatcherResult<()> {
        self.send(SimpleMessage::Submit {
            check_id: check_id.to_string(),
            submission,
        })
        .await
    }

    /// The check finished a run; flush if it produced anything.
    pub async fn submit_complete(&self, check_id: &str) -> BatcherResult<()> {
        self.send(SimpleMessage::SubmitComplete {
            check_id: check_id.to_string(),
        })
        .await
    }

    pub async fn clear_state(&self, check_id: &str) -> BatcherResult<()> {
        self.send(SimpleMessage::ClearState {
            check_id: check_id.to_string(),
        })
        .await
    }

    pub async fn flush(&self) -> BatcherResult<()> {
        self.send(SimpleMessage::Flush).await
    }

    pub async fn inspect(&self, check_id: &str) -> BatcherResult<Option<BatchSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(SimpleMessage::Inspect {
            check_id: check_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BatcherError::NotRunning)
    }

    pub async fn stop(&self) -> BatcherResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(SimpleMessage::Stop { done }).await?;
        rx.await.map_err(|_| BatcherError::NotRunning)
    }

    async fn send(&self, msg: SimpleMessage) -> BatcherResult<()> {
        self.tx.send(msg).await.map_err(|_| BatcherError::NotRunning)
    }
}

async fn run_simple_loop(
    config: BatcherConfig,
    mut builder: BatchBuilder,
    forwarder: Forwarder,
    mut rx: mpsc::Receiver<SimpleMessage>,
) {
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    info!("non-transactional batcher started");

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    info!("non-transactional batcher queue closed");
                    break;
                };
                match msg {
                    SimpleMessage::Submit { check_id, submission } => {
                        let encoded = match submission.encoded_size() {
                            Ok(size) => size,
                            Err(e) => {
                                error!(%check_id, kind = submission.kind(), error = %e, "failed to encode submission, dropped");
                                continue;
                            }
                        };
                        let mut size = builder.added_size(&check_id, &submission, encoded);
                        if builder.payload_size() + size > config.max_message_size && builder.is_flushable() {
                            flush(&config, &mut builder, &forwarder).await;
                            size = builder.added_size(&check_id, &submission, encoded);
                        }
                        if builder.payload_size() + size > config.max_message_size {
                            error!(%check_id, kind = submission.kind(), size, "submission larger than max message size, dropped");
                            continue;
                        }
                        let stop_snapshot = submission.is_stop_snapshot();
                        let full = builder.add(&check_id, None, submission, size);
                        if full || stop_snapshot {
                            flush(&config, &mut builder, &forwarder).await;
                        }
                    }
                    SimpleMessage::SubmitComplete { check_id } => {
                        if builder.has_data(&check_id) {
                            flush(&config, &mut builder, &forwarder).await;
                        }
                    }
                    SimpleMessage::ClearState { check_id } => {
                        builder.remove(&check_id);
                    }
                    SimpleMessage::Flush => flush(&config, &mut builder, &forwarder).await,
                    SimpleMessage::Inspect { check_id, reply } => {
                        let _ = reply.send(builder.summary(&check_id));
                    }
                    SimpleMessage::Stop { done } => {
                        let _ = done.send(());
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if builder.is_flushable() {
                    flush(&config, &mut builder, &forwarder).await;
                }
            }
        }
    }

    info!("non-transactional batcher stopped");
}

async fn flush(config: &BatcherConfig, builder: &mut BatchBuilder, forwarder: &Forwarder) {
    let states = builder.take_all();
    if states.is_empty() {
        return;
    }

    let payload = build_payload(&config.hostname, states.iter().map(|(_, s)| s));
    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, checks = states.len(), "failed to serialize payload, dropped");
            return;
        }
    };
    if config.log_payloads {
        debug!(payload = %mask_api_key(&String::from_utf8_lossy(&body)), "flushing batch");
    }
    debug!(checks = states.len(), bytes = body.len(), "batch flushed");

    let payload = TransactionalPayload {
        path: config.intake_path.clone(),
        body,
        transactions: HashMap::new(),
    };
    if let Err(e) = forwarder.submit(payload).await {
        error!(error = %e, "failed to hand payload to forwarder");
    }
}
