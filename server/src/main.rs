use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lattice_server::events;
use lattice_server::mem::MemStore;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
struct Args {
    /// Address to serve the events API on.
    #[arg(long, env = "LATTICE_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    lattice_logging::setup_global_subscriber()?;

    let store = Arc::new(MemStore::default());
    let shutdown = CancellationToken::new();

    let app = events::router(store, shutdown.clone());
    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen_addr))?;

    tracing::info!(addr = %args.listen_addr, "Serving events API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down, closing event streams");
            shutdown.cancel();
        })
        .await
        .context("Server failed")?;

    Ok(())
}
