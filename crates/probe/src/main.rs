//! Metrics Probe - periodic entity and topology discovery
//!
//! Queries the configured Prometheus servers on a fixed interval, builds the
//! business and infrastructure topologies and serves the latest result.

use anyhow::Result;
use metrics_probe::{api, config};
use probe_lib::{
    discovery::DiscoveryLoopBuilder, HealthRegistry, MetricProvider, StructuredLogger, Topology,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROBE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-probe");

    let settings = config::ProbeSettings::load()?;
    let probe_config = config::load_probe_config(&settings.config_path)?;
    info!(
        probe_id = %settings.probe_id,
        config_path = %settings.config_path,
        "Probe configured"
    );

    let provider = Arc::new(MetricProvider::from_config(&probe_config)?);
    let topology = Topology::new(
        probe_config.business_apps.clone(),
        probe_config.cluster_id.clone(),
    );

    let logger = StructuredLogger::new(&settings.probe_id);
    logger.log_startup(PROBE_VERSION, provider.server_count(), provider.workers());

    let health_registry = HealthRegistry::new();
    let (discovery_loop, mut results) = DiscoveryLoopBuilder::new()
        .provider(provider)
        .topology(topology)
        .health(health_registry.clone())
        .probe_id(&settings.probe_id)
        .interval(probe_config.discovery_interval())
        .build()?;

    let app_state = Arc::new(api::AppState::new(health_registry));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state.clone()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(discovery_loop.run(shutdown_rx));

    let publisher = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            app_state.publish(result).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    if shutdown_tx.send(()).is_err() {
        warn!("Discovery loop already stopped");
    }
    loop_handle.await?;
    publisher.await?;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
