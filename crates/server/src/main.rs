//! Authoritative sporefall game server.

use clap::Parser;
use server::config::{Args, Config};
use server::Hub;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Sporefall Server v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let hub = Hub::new(&config.database_url)?;
    if let Err(e) = hub.queries().ensure_schema().await {
        warn!("Failed to ensure database schema, continuing without it: {e}");
    }
    tokio::spawn(hub.clone().run());

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {addr} (websocket endpoint: /ws)");

    axum::serve(listener, server::router(hub)).await?;
    Ok(())
}
