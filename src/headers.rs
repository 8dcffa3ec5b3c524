//! Response headers for event-stream subscriptions
//!
//! Shared caches may hold a stream response for one second less than the
//! stream lives, private caches never.

use crate::config::ChannelConfig;

/// Header name/value pairs, lowercase names.
pub type HeaderList = Vec<(&'static str, String)>;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Headers sent before the first byte of a subscription body.
pub fn stream_headers(config: &ChannelConfig) -> HeaderList {
    vec![
        ("content-type", EVENT_STREAM_CONTENT_TYPE.to_string()),
        (
            "cache-control",
            format!(
                "s-maxage={}; max-age=0; stale-while-revalidate=0; stale-if-error=0",
                config.shared_cache_max_age()
            ),
        ),
        ("connection", "keep-alive".to_string()),
    ]
}
