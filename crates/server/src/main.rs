//! Peerlink server
//!
//! HTTP service issuing and redeeming share-links for VPN peer configs,
//! backed by an upstream panel and an embedded SQLite store.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peerlink_common::{config::ServiceConfig, Database};

mod routes;
mod sweep;

#[derive(Parser)]
#[command(name = "peerlinkd")]
#[command(about = "VPN peer share-link service")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides config
    #[arg(short, long)]
    listen: Option<String>,

    /// Store directory, overrides config
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Peerlink server v{}", peerlink_common::VERSION);

    let config_path = cli
        .config
        .unwrap_or_else(|| peerlink_common::default_store_path().join("config.toml"));
    let mut config = ServiceConfig::load(&config_path)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(store) = cli.store {
        config.server.store_path = store;
    }

    tokio::fs::create_dir_all(&config.server.store_path).await?;
    let db = Database::open(&config.db_path())?;

    let cleanup_interval = config.links.cleanup_interval_secs;
    let listen = config.server.listen.clone();
    let state = Arc::new(routes::AppState::new(config, db)?);

    if state.panel.handshake().await {
        info!("Panel reachable at {}", state.config.panel.base_url);
    } else {
        tracing::warn!(
            "Panel at {} not reachable; peer operations will fail until it is",
            state.config.panel.base_url
        );
    }

    let sweep_handle = tokio::spawn(sweep::run(state.links.clone(), cleanup_interval));

    let app = routes::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("Listening on {}", listen);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    sweep_handle.abort();
    info!("Server shutdown complete");
    Ok(())
}
