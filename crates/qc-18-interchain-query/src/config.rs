//! # Interchain Query Configuration
//!
//! Timeouts derive from the host chain's block time times a safety
//! multiplier, so they follow the chain rather than a fixed wall-clock value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::algorithms::schema::ALL_BALANCES_PATH;
use crate::domain::{ChannelId, InterchainQueryError, DEFAULT_MAX_RETRIES};

/// Relay dispatcher configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterchainQueryConfig {
    /// Failed sends in a row, or rejected results, before a query is failed.
    pub max_retries: u32,

    /// Host chain block time in milliseconds.
    pub block_time_ms: u64,

    /// Multiplier applied to every block-derived timeout.
    pub safety_multiplier: u64,

    /// Blocks to wait for a transport acknowledgement.
    pub ack_timeout_blocks: u64,

    /// Blocks a query may stay in flight before it expires.
    pub query_timeout_blocks: u64,

    /// Per-channel override of the send timeout, in milliseconds.
    pub channel_timeouts_ms: BTreeMap<String, u64>,

    /// Interval between expiry sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for InterchainQueryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            block_time_ms: 5_000,
            safety_multiplier: 2,
            ack_timeout_blocks: 5,
            query_timeout_blocks: 10,
            channel_timeouts_ms: BTreeMap::new(),
            sweep_interval_ms: 1_000,
        }
    }
}

impl InterchainQueryConfig {
    /// Create a config for testing (millisecond-scale timeouts).
    pub fn for_testing() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            block_time_ms: 10,
            safety_multiplier: 2,
            ack_timeout_blocks: 5,
            query_timeout_blocks: 10,
            channel_timeouts_ms: BTreeMap::new(),
            sweep_interval_ms: 20,
        }
    }

    /// Parse from JSON; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, InterchainQueryError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| InterchainQueryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would disable timeouts or retries.
    pub fn validate(&self) -> Result<(), InterchainQueryError> {
        let invalid = |msg: &str| Err(InterchainQueryError::InvalidConfig(msg.to_string()));
        if self.max_retries == 0 {
            return invalid("max_retries must be at least 1");
        }
        if self.block_time_ms == 0 || self.safety_multiplier == 0 {
            return invalid("block_time_ms and safety_multiplier must be positive");
        }
        if self.ack_timeout_blocks == 0 || self.query_timeout_blocks == 0 {
            return invalid("timeout block counts must be positive");
        }
        if self.sweep_interval_ms == 0 {
            return invalid("sweep_interval_ms must be positive");
        }
        if self.channel_timeouts_ms.values().any(|ms| *ms == 0) {
            return invalid("channel timeouts must be positive");
        }
        if self.block_timeout_ms(self.ack_timeout_blocks).is_none()
            || self.block_timeout_ms(self.query_timeout_blocks).is_none()
        {
            return invalid("block-derived timeouts overflow u64 milliseconds");
        }
        Ok(())
    }

    fn block_timeout_ms(&self, blocks: u64) -> Option<u64> {
        self.block_time_ms
            .checked_mul(blocks)?
            .checked_mul(self.safety_multiplier)
    }

    /// Override the send timeout of one channel.
    pub fn with_channel_timeout(mut self, channel: &ChannelId, timeout: Duration) -> Self {
        self.channel_timeouts_ms
            .insert(channel.to_string(), timeout.as_millis() as u64);
        self
    }

    /// Send timeout for a channel.
    pub fn send_timeout(&self, channel: &ChannelId) -> Duration {
        let ms = self
            .channel_timeouts_ms
            .get(channel.as_str())
            .copied()
            .unwrap_or_else(|| {
                self.block_timeout_ms(self.ack_timeout_blocks)
                    .unwrap_or(u64::MAX)
            });
        Duration::from_millis(ms)
    }

    /// How long a query may stay in flight, in milliseconds.
    pub fn query_timeout_ms(&self) -> u64 {
        self.block_timeout_ms(self.query_timeout_blocks)
            .unwrap_or(u64::MAX)
    }

    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Host-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Query paths the host answers (`interchainquery.params.allow_queries`).
    pub allowed_queries: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            allowed_queries: vec![ALL_BALANCES_PATH.to_string()],
        }
    }
}

impl HostConfig {
    /// Host answering exactly the given paths.
    pub fn allowing<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_queries: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Is the path on the allow-list?
    pub fn is_allowed(&self, path: &str) -> bool {
        self.allowed_queries.iter().any(|p| p == path)
    }
}
