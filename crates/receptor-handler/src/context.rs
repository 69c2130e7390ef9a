//! Per-check configuration and the long-lived components handlers talk to.

use receptor_batcher::{Batcher, SimpleBatcher};
use receptor_core::{AgentConfig, CheckId};
use receptor_state::CheckStateStore;
use receptor_txn::TransactionManager;

/// Identity and raw configuration of one check instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckConfig {
    pub check_id: CheckId,
    /// Instance configuration, as handed to the check.
    pub config: String,
    /// Shared `init_config` section of the check's configuration file.
    pub init_config: String,
}

impl CheckConfig {
    pub fn new(check_id: impl Into<CheckId>) -> Self {
        Self {
            check_id: check_id.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: impl Into<String>, init_config: impl Into<String>) -> Self {
        self.config = config.into();
        self.init_config = init_config.into();
        self
    }
}

/// Handles to the shared loops. Built once at startup and cloned into
/// every check handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub state: CheckStateStore,
    pub transactions: TransactionManager,
    pub batcher: Batcher,
    pub simple_batcher: SimpleBatcher,
    /// Bound on each handler's inbound operation queue.
    pub channel_buffer: usize,
    /// Upper bound on actions per transaction; sizes the notification queue.
    pub max_actions: usize,
}

impl HandlerContext {
    pub fn new(
        config: &AgentConfig,
        state: CheckStateStore,
        transactions: TransactionManager,
        batcher: Batcher,
        simple_batcher: SimpleBatcher,
    ) -> Self {
        Self {
            state,
            transactions,
            batcher,
            simple_batcher,
            channel_buffer: config.transaction_channel_buffer,
            max_actions: config.transaction_max_actions,
        }
    }

    /// Capacity of a handler's notification queue: every action of the
    /// in-flight transaction plus the terminal notifications.
    pub fn notification_buffer(&self) -> usize {
        self.max_actions + 4
    }
}
