mod http;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use telecast_core::catalog::Catalog;
use telecast_core::registry::ChannelRegistry;
use telecast_core::{load_config, logging};

use http::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;

    info!("telecast starting");

    let catalog = Arc::new(Catalog::load(config.streaming.catalog_path.clone()).await?);
    let registry = Arc::new(ChannelRegistry::new(
        config.streaming.clone(),
        Arc::clone(&catalog),
    ));

    // Bring every persisted channel back on air. Output directories are
    // wiped; queues replay from the catalog.
    let restored = registry.restore_persisted().await;
    info!(restored, "persisted channels restored");

    let state = AppState {
        registry: Arc::clone(&registry),
    };
    let router = create_router(state, &config);

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown_all();
    info!("telecast stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
