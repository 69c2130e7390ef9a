//! Agent configuration (`receptor.toml`).
//!
//! Every key is optional; missing keys take the defaults below. Durations
//! accept `"500ms"`, `"5s"`, `"10m"`, `"1h"` or a bare integer of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub check_state_root_path: PathBuf,
    #[serde(deserialize_with = "de_duration")]
    pub check_state_expiration_duration: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub check_state_purge_duration: Duration,
    pub check_transactionality_enabled: bool,

    pub batcher_max_capacity: usize,
    pub batcher_max_message_size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub batcher_flush_interval: Duration,

    pub transaction_channel_buffer: usize,
    #[serde(deserialize_with = "de_duration")]
    pub transaction_tick_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub transaction_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub transaction_eviction_timeout: Duration,
    pub transaction_max_actions: usize,

    #[serde(deserialize_with = "de_duration")]
    pub forwarder_retry_min: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub forwarder_retry_max: Duration,
    pub forwarder_max_retries: u32,
    pub forwarder_channel_buffer: usize,
    pub forwarder_dry_run: bool,

    pub intake_path: String,
    pub gzip_payloads: bool,
    pub hostname: String,
    pub log_payloads: bool,

    pub sts_url: String,
    pub api_key: Option<String>,
    pub skip_ssl_validation: bool,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub https: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            check_state_root_path: PathBuf::from("/var/lib/receptor/check-state"),
            check_state_expiration_duration: Duration::from_secs(10 * 60),
            check_state_purge_duration: Duration::from_secs(5 * 60),
            check_transactionality_enabled: true,
            batcher_max_capacity: 1000,
            batcher_max_message_size: 4 * 1024 * 1024,
            batcher_flush_interval: Duration::from_secs(1),
            transaction_channel_buffer: 100,
            transaction_tick_interval: Duration::from_secs(10),
            transaction_timeout: Duration::from_secs(5 * 60),
            transaction_eviction_timeout: Duration::from_secs(10 * 60),
            transaction_max_actions: 256,
            forwarder_retry_min: Duration::from_secs(1),
            forwarder_retry_max: Duration::from_secs(30),
            forwarder_max_retries: 4,
            forwarder_channel_buffer: 100,
            forwarder_dry_run: false,
            intake_path: "stsAgent/intake".to_string(),
            gzip_payloads: true,
            hostname: default_hostname(),
            log_payloads: false,
            sts_url: "http://localhost:7077".to_string(),
            api_key: None,
            skip_ssl_validation: false,
            proxy: ProxyConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.forwarder_dry_run && self.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(
                "api_key is required unless forwarder_dry_run is set".to_string(),
            ));
        }
        let non_zero = [
            ("batcher_max_capacity", self.batcher_max_capacity),
            ("batcher_max_message_size", self.batcher_max_message_size),
            ("transaction_channel_buffer", self.transaction_channel_buffer),
            ("transaction_max_actions", self.transaction_max_actions),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
            }
        }
        if self.forwarder_retry_min > self.forwarder_retry_max {
            return Err(ConfigError::Invalid(
                "forwarder_retry_min must not exceed forwarder_retry_max".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Parse a duration string like "5s", "500ms", "2m", "1h" or "10".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text:?}"))),
    }
}
