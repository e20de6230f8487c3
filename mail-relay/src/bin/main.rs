//! mail-relay server

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mail_relay::{config::RelayConfig, handlers, observability, state::RelayState};

#[derive(Parser)]
#[command(name = "mail-relay")]
#[command(version)]
#[command(about = "HTTP-to-SMTP relay with sender rotation", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to ./config.toml when present)
    #[arg(short, long, env = "MAILRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    observability::init()?;

    let config = RelayConfig::load(cli.config.as_deref())?;
    let addr = config.server.bind_addr()?;

    tracing::info!(
        pool_size = config.rotation.pool_size,
        max_attempts = config.delivery.max_attempts,
        backend = ?config.delivery.backend,
        redis = %format!("{}:{}", config.redis.host, config.redis.port),
        mysql = %format!("{}:{}", config.database.host, config.database.port),
        "Configuration loaded"
    );

    let state = RelayState::from_config(config)?;
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
