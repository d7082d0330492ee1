//! Tether actuator simulator service.
//!
//! Serves the actuator RPC endpoint over HTTP from an in-memory actuator.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tether_sim::{create_router, SimConfig, SimState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tether=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tether actuator simulator");

    let config = SimConfig::from_env();
    tracing::info!(
        lease_ttl_secs = config.lease_ttl_secs,
        power_on_delay_ms = config.power_on_delay_ms,
        stand_delay_ms = config.stand_delay_ms,
        power_off_delay_ms = config.power_off_delay_ms,
        seed_permanent = config.seed_permanent,
        "Loaded simulator configuration"
    );

    let listen_addr = config.listen_addr.clone();
    let app = create_router(SimState::from_config(config));

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Simulator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
