//! HTTP transport for the channel
//!
//! `GET /events` streams, `POST /events` publishes; `/clients` and `/stats`
//! are introspection. Cross-origin access is granted only to the origins
//! listed in `cors_origins`.

mod error;
mod handlers;
mod state;

pub use error::AppError;
pub use state::AppState;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::channel::Channel;
use crate::config::ChannelConfig;

pub fn create_router(channel: Channel) -> Router {
    let cors = cors_layer(channel.config());

    let mut router = Router::new()
        .route("/events", get(handlers::subscribe).post(handlers::publish))
        .route("/clients", get(handlers::clients))
        .route("/stats", get(handlers::stats));

    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(channel))
}

/// `None` when no origin is configured; `*` allows any origin.
fn cors_layer(config: &ChannelConfig) -> Option<CorsLayer> {
    if config.cors_origins.is_empty() {
        return None;
    }

    let allow_origin = if config.cors_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                HeaderName::from_static("last-event-id"),
                header::CONTENT_TYPE,
            ]),
    )
}
