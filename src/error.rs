//! Error types for the event relay
//!
//! The channel itself has no fatal error in normal operation; these cover
//! configuration problems, payload serialization at the publish boundary,
//! and use after shutdown.

use thiserror::Error;

/// Top-level channel error
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel has been stopped")]
    Stopped,

    #[error("sequence ids exhausted at {0}")]
    IdsExhausted(u64),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("maxStreamDuration must be greater than zero")]
    ZeroStreamDuration,

    #[error("startId leaves no room for a sequence id")]
    StartIdExhausted,

    #[error("failed to parse configuration: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Write failure on a single subscriber's output sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("subscriber sink is closed")]
    Closed,
}
