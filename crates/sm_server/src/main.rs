use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sm_server::config::ServerConfig;
use sm_server::routes;
use sm_server::state::AppState;
use sm_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();
    let store = Store::open(&config.database).await?;

    let state = AppState::new(store, config.clone());
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "secumsg delivery server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
