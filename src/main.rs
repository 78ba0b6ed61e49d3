use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smart_plug_monitor::{
    api, config::Config, dispatcher::Dispatcher, registry::Registry, shelly::HttpRpcClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Env vars may also be set externally, so a missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let rpc = Arc::new(HttpRpcClient::new(config.rpc_timeout));
    let dispatcher = Dispatcher::new(config.snapshot_channel_capacity);
    let registry = Arc::new(
        Registry::new(rpc, config.poll, dispatcher).with_action_timeout(config.rpc_timeout),
    );

    if config.devices.is_empty() {
        warn!("No devices configured; register them over HTTP");
    }
    for address in &config.devices {
        if let Err(e) = registry.register(address.clone()).await {
            error!(address = %address, error = %e, "Failed to register device");
        }
    }
    info!(
        devices = config.devices.len(),
        interval_secs = config.poll.interval.as_secs(),
        "Polling started"
    );

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(registry.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
