use std::net::SocketAddr;

use anyhow::Context;
use event_relay::http::create_router;
use event_relay::{Channel, ChannelConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = event_relay::SERVICE_VERSION, "Starting event relay");

    let config = load_config()?;
    let channel = Channel::new(config)?;
    let app = create_router(channel.clone());

    let addr: SocketAddr = std::env::var("EVENT_RELAY_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("invalid EVENT_RELAY_ADDR")?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(channel))
    .await?;

    Ok(())
}

/// Read the JSON file named by `EVENT_RELAY_CONFIG`, or use defaults.
fn load_config() -> Result<ChannelConfig, anyhow::Error> {
    let Ok(path) = std::env::var("EVENT_RELAY_CONFIG") else {
        return Ok(ChannelConfig::default());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path))?;
    let config = ChannelConfig::from_json_str(&raw)
        .with_context(|| format!("invalid config file {}", path))?;
    Ok(config)
}

/// Wait for ctrl-c, then close every open stream so the server can drain.
async fn shutdown_signal(channel: Channel) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    channel.stop();
}
