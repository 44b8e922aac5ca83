//! Periodic discovery loop
//!
//! Runs one discovery cycle per interval: fans the entity tasks out over the
//! worker pool, assembles the topology and hands the result to a channel.

use super::MetricProvider;
use crate::error::DispatchError;
use crate::health::{components, HealthRegistry};
use crate::models::NormalizedEntity;
use crate::observability::{ProbeMetrics, StructuredLogger};
use crate::topology::{LayerCounts, Topology};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Configuration for the discovery loop
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Time between cycle starts (default: 10 minutes)
    pub interval: Duration,
    /// Finished cycles buffered for the consumer
    pub buffer_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            buffer_size: 4,
        }
    }
}

/// Output of one discovery cycle
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub cycle: u64,
    pub entities: Vec<NormalizedEntity>,
    pub counts: LayerCounts,
    pub elapsed: Duration,
}

/// Drives the metric provider and topology builders on a fixed interval
pub struct DiscoveryLoop {
    provider: Arc<MetricProvider>,
    topology: Topology,
    config: DiscoveryConfig,
    result_tx: mpsc::Sender<DiscoveryResult>,
    health: HealthRegistry,
    metrics: ProbeMetrics,
    logger: StructuredLogger,
    cycle: u64,
}

impl DiscoveryLoop {
    pub fn new(
        provider: Arc<MetricProvider>,
        topology: Topology,
        config: DiscoveryConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<DiscoveryResult>) {
        let (result_tx, result_rx) = mpsc::channel(config.buffer_size.max(1));

        let discovery_loop = Self {
            provider,
            topology,
            config,
            result_tx,
            health,
            metrics: ProbeMetrics::new(),
            logger,
            cycle: 0,
        };

        (discovery_loop, result_rx)
    }

    /// Run cycles until shutdown is signalled or the consumer goes away
    ///
    /// The first cycle starts immediately.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            tasks = self.provider.task_count(),
            workers = self.provider.workers(),
            "Starting discovery loop"
        );

        for component in [
            components::DISCOVERY,
            components::QUERY_BACKEND,
            components::TOPOLOGY,
        ] {
            self.health.register(component).await;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = match self.run_cycle().await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(error = %e, "Discovery cycle failed");
                            self.health
                                .set_unhealthy(components::DISCOVERY, e.to_string())
                                .await;
                            continue;
                        }
                    };

                    if self.result_tx.send(result).await.is_err() {
                        warn!("Discovery result receiver dropped, stopping loop");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down discovery loop");
                    break;
                }
            }
        }
    }

    /// Run a single discovery cycle and update health and metrics
    pub async fn run_cycle(&mut self) -> Result<DiscoveryResult, DispatchError> {
        let start = Instant::now();
        self.cycle += 1;

        let discovered = self.provider.discover().await?;
        let discovered_count = discovered.len();
        let (entities, counts) = self.topology.assemble(discovered);
        let elapsed = start.elapsed();

        self.metrics
            .set_entities_discovered("business", counts.business as i64);
        self.metrics
            .set_entities_discovered("infrastructure", counts.infrastructure as i64);
        self.metrics.observe_discovery_cycle(elapsed.as_secs_f64());

        let tasks = self.provider.task_count();
        self.logger.log_discovery_cycle(
            self.cycle,
            tasks,
            discovered_count,
            entities.len(),
            elapsed.as_millis(),
        );

        self.health.set_healthy(components::DISCOVERY).await;
        if tasks > 0 && discovered_count == 0 {
            self.health
                .set_degraded(
                    components::QUERY_BACKEND,
                    "No entities returned by any metrics server",
                )
                .await;
        } else {
            self.health.set_healthy(components::QUERY_BACKEND).await;
        }
        self.health.set_healthy(components::TOPOLOGY).await;
        self.health.cycle_completed().await;

        Ok(DiscoveryResult {
            cycle: self.cycle,
            entities,
            counts,
            elapsed,
        })
    }
}

/// Builder for the discovery loop
pub struct DiscoveryLoopBuilder {
    provider: Option<Arc<MetricProvider>>,
    topology: Option<Topology>,
    health: HealthRegistry,
    probe_id: String,
    config: DiscoveryConfig,
}

impl DiscoveryLoopBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            topology: None,
            health: HealthRegistry::new(),
            probe_id: "metrics-probe".to_string(),
            config: DiscoveryConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<MetricProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Share a health registry with the API server
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn probe_id(mut self, probe_id: impl Into<String>) -> Self {
        self.probe_id = probe_id.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn build(self) -> Result<(DiscoveryLoop, mpsc::Receiver<DiscoveryResult>)> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Metric provider is required"))?;
        let topology = self
            .topology
            .ok_or_else(|| anyhow::anyhow!("Topology is required"))?;

        Ok(DiscoveryLoop::new(
            provider,
            topology,
            self.config,
            self.health,
            StructuredLogger::new(self.probe_id),
        ))
    }
}

impl Default for DiscoveryLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
