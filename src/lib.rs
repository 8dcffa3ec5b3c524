//! Event Relay
//!
//! Single-process broadcast channel for server-sent event streams:
//! - Monotonic sequence ids for every published record
//! - Bounded history with resume-by-id or fixed rewind replay
//! - Keepalive pings and forced expiry of long-lived streams
//! - Exactly-once teardown under racing close/timeout triggers
//!
//! # Architecture
//!
//! ```text
//!   publish ──┐                 ┌── subscribe (transport)
//!             │                 │
//!        ┌────▼─────────────────▼────┐
//!        │  Channel (one mutex)      │
//!        │  next_id · history · set  │
//!        └────┬─────────────────▲────┘
//!             │                 │
//!     fan-out to sinks    keepalive / lifecycle timers
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod headers;
pub mod history;
pub mod http;
pub mod message;
pub mod metrics;
pub mod subscriber;

pub use channel::{Channel, ChannelEvent, DisconnectReason, SubscribeRequest, Subscription};
pub use config::ChannelConfig;
pub use error::{ChannelError, ConfigError, SinkError};
pub use message::{FormattedMessage, Payload};
pub use subscriber::{EventStream, Subscriber};

// Library version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
