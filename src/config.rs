//! Channel configuration
//!
//! All options are optional and fall back to their defaults. Field names
//! deserialize from camelCase (`pingInterval`, `historySize`, ...) so a
//! host can hand over the same option names it documents to operators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a broadcast channel. Immutable once the channel is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Keepalive cadence in milliseconds; 0 disables pings (default: 3000).
    #[serde(alias = "pingInterval")]
    pub ping_interval_ms: u64,
    /// Forced disconnect after this many milliseconds (default: 30000).
    #[serde(alias = "maxStreamDuration")]
    pub max_stream_duration_ms: u64,
    /// Value sent in the `retry:` hint (default: 1000).
    #[serde(alias = "clientRetryInterval")]
    pub client_retry_interval_ms: u64,
    /// First assigned sequence id (default: 1).
    pub start_id: u64,
    /// Maximum retained history records (default: 100).
    pub history_size: usize,
    /// Replay count for subscribers without a resume id (default: 0).
    pub rewind: usize,
    /// Origins allowed to subscribe cross-origin; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 3_000,
            max_stream_duration_ms: 30_000,
            client_retry_interval_ms: 1_000,
            start_id: 1,
            history_size: 100,
            rewind: 0,
            cors_origins: Vec::new(),
        }
    }
}

impl ChannelConfig {
    /// Parse a JSON document, filling missing options with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stream_duration_ms == 0 {
            return Err(ConfigError::ZeroStreamDuration);
        }
        if self.start_id == u64::MAX {
            return Err(ConfigError::StartIdExhausted);
        }
        Ok(())
    }

    /// Keepalive period, `None` when pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn max_stream_duration(&self) -> Duration {
        Duration::from_millis(self.max_stream_duration_ms)
    }

    /// Shared-cache lifetime in seconds: one second short of stream expiry.
    pub fn shared_cache_max_age(&self) -> u64 {
        (self.max_stream_duration_ms / 1000).saturating_sub(1)
    }
}
