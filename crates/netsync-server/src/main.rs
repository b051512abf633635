//! NetSync Server
//!
//! TCP relay for sessions plus the HTTP inspector.

use anyhow::Context;
use netsync_server::{Server, ServerConfig, inspector};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let http_addr = config.http_addr;

    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("Failed to bind session listener to {}", config.bind_addr))?;
    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind inspector to {http_addr}"))?;

    tracing::info!("Server listening on {}", server.local_addr()?);
    tracing::info!("  - Sessions: tcp://{}", config.bind_addr);
    tracing::info!("  - Inspector: http://{http_addr}/rooms");

    let hub = server.hub();
    let inspector = tokio::spawn(async move {
        if let Err(e) = inspector::serve(http_listener, hub).await {
            tracing::error!(error = %e, "Inspector stopped");
        }
    });

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    inspector.abort();
    Ok(())
}
