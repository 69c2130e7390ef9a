use std::time::Duration;

use receptor_core::AgentConfig;

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Filled into raw metrics submitted without a host, and sent as the
    /// payload's `internalHostname`.
    pub hostname: String,
    /// Element count that triggers a flush.
    pub max_capacity: usize,
    /// Byte budget of a single payload.
    pub max_message_size: usize,
    pub flush_interval: Duration,
    pub channel_buffer: usize,
    /// Payloads a single transaction may produce before it is failed.
    pub max_actions_per_transaction: usize,
    pub intake_path: String,
    pub log_payloads: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            max_capacity: 1000,
            max_message_size: 4 * 1024 * 1024,
            flush_interval: Duration::from_secs(1),
            channel_buffer: 100,
            max_actions_per_transaction: 256,
            intake_path: "stsAgent/intake".to_string(),
            log_payloads: false,
        }
    }
}

impl BatcherConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            hostname: config.hostname.clone(),
            max_capacity: config.batcher_max_capacity,
            max_message_size: config.batcher_max_message_size,
            flush_interval: config.batcher_flush_interval,
            channel_buffer: config.transaction_channel_buffer,
            max_actions_per_transaction: config.transaction_max_actions,
            intake_path: config.intake_path.clone(),
            log_payloads: config.log_payloads,
        }
    }
}
