//! Pipeline — constructs the long-lived loops once and wires them together.

use receptor_batcher::{Batcher, BatcherConfig, SimpleBatcher};
use receptor_core::AgentConfig;
use receptor_forwarder::{Forwarder, ForwarderConfig, Transport};
use receptor_state::{CheckStateStore, StateConfig};
use receptor_txn::{TransactionManager, TransactionManagerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::HandlerContext;
use crate::manager::CheckManager;

/// Every shared component of a running agent.
pub struct Pipeline {
    pub state: CheckStateStore,
    pub transactions: TransactionManager,
    pub forwarder: Forwarder,
    pub batcher: Batcher,
    pub simple_batcher: SimpleBatcher,
    pub checks: CheckManager,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the state purge task, transaction manager, forwarder and both
    /// batchers, and build the check manager over them. Must be called
    /// inside a tokio runtime.
    pub fn start<T: Transport>(config: &AgentConfig, transport: T) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let state = CheckStateStore::new(StateConfig::from_agent_config(config));
        let purge = state.spawn_purge(shutdown_rx.clone());

        let transactions =
            TransactionManager::start(TransactionManagerConfig::from_agent_config(config));
        let (forwarder, forwarder_task) = Forwarder::start(
            ForwarderConfig::from_agent_config(config),
            transport,
            transactions.clone(),
            shutdown_rx,
        );

        let batcher_config = BatcherConfig::from_agent_config(config);
        let batcher = Batcher::start(
            batcher_config.clone(),
            transactions.clone(),
            forwarder.clone(),
        );
        let simple_batcher = SimpleBatcher::start(batcher_config, forwarder.clone());

        let context = HandlerContext::new(
            config,
            state.clone(),
            transactions.clone(),
            batcher.clone(),
            simple_batcher.clone(),
        );
        let checks = CheckManager::new(context, config.check_transactionality_enabled);

        info!(
            state_root = %config.check_state_root_path.display(),
            transactional = config.check_transactionality_enabled,
            hostname = %config.hostname,
            "pipeline started"
        );

        Self {
            state,
            transactions,
            forwarder,
            batcher,
            simple_batcher,
            checks,
            shutdown,
            tasks: vec![purge, forwarder_task],
        }
    }

    /// Stop every loop, handlers first. Pending non-transactional data is
    /// flushed before the batchers stop; open transactions are rolled back.
    pub async fn shutdown(self) {
        info!("pipeline shutting down");
        self.checks.stop().await;

        if let Err(e) = self.simple_batcher.flush().await {
            debug!(error = %e, "non-transactional batcher already stopped");
        }
        if let Err(e) = self.simple_batcher.stop().await {
            debug!(error = %e, "non-transactional batcher already stopped");
        }
        if let Err(e) = self.batcher.stop().await {
            debug!(error = %e, "batcher already stopped");
        }
        if let Err(e) = self.transactions.stop().await {
            debug!(error = %e, "transaction manager already stopped");
        }

        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "pipeline task ended abnormally");
            }
        }
        info!("pipeline stopped");
    }
}
