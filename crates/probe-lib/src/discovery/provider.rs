//! Metric provider driving one discovery cycle across all servers

use super::backend::PrometheusClient;
use super::definition::EntityDef;
use super::reconcile::IdentityContext;
use super::task::EntityTask;
use super::QueryClient;
use crate::config::ProbeConfig;
use crate::dispatch::{BoxedTask, WorkerPool};
use crate::error::DispatchError;
use crate::models::{EntityType, NormalizedEntity};
use crate::observability::ProbeMetrics;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One backend with every entity definition its exporters declare
pub struct ServerTarget {
    pub client: Arc<dyn QueryClient>,
    pub entities: Vec<Arc<EntityDef>>,
}

impl ServerTarget {
    pub fn new(client: Arc<dyn QueryClient>, entities: Vec<Arc<EntityDef>>) -> Self {
        Self { client, entities }
    }
}

/// Enumerates discovery tasks and runs them on a shared worker pool
pub struct MetricProvider {
    targets: Vec<ServerTarget>,
    context: Arc<IdentityContext>,
    pool: WorkerPool<NormalizedEntity>,
    metrics: ProbeMetrics,
}

impl MetricProvider {
    /// Create a provider; must be called inside a tokio runtime
    pub fn new(targets: Vec<ServerTarget>, context: IdentityContext, workers: usize) -> Self {
        Self {
            targets,
            context: Arc::new(context),
            pool: WorkerPool::new(workers),
            metrics: ProbeMetrics::new(),
        }
    }

    /// Build a provider with one Prometheus client per configured server
    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let exporters = config.compile_exporters()?;

        let mut targets = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let client = PrometheusClient::new(&server.name, &server.url, server.timeout())?;
            let entities = server
                .exporters
                .iter()
                .filter_map(|name| exporters.get(name))
                .flatten()
                .cloned()
                .collect();

            info!(server = %server.name, endpoint = %client.endpoint(), "Configured metrics server");
            targets.push(ServerTarget::new(Arc::new(client), entities));
        }

        Ok(Self::new(targets, config.identity_context(), config.workers))
    }

    /// Number of tasks one cycle dispatches
    pub fn task_count(&self) -> usize {
        self.targets.iter().map(|t| t.entities.len()).sum()
    }

    pub fn server_count(&self) -> usize {
        self.targets.len()
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    fn tasks(&self) -> Vec<BoxedTask<NormalizedEntity>> {
        self.targets
            .iter()
            .flat_map(|target| {
                target.entities.iter().map(|def| {
                    Box::new(EntityTask::new(
                        Arc::clone(&target.client),
                        Arc::clone(def),
                        Arc::clone(&self.context),
                    )) as BoxedTask<NormalizedEntity>
                })
            })
            .collect()
    }

    /// Run one full discovery cycle and return the merged entity set
    ///
    /// Safe to cancel: a dropped cycle's late results are discarded.
    pub async fn discover(&self) -> Result<Vec<NormalizedEntity>, DispatchError> {
        let tasks = self.tasks();
        let expected = tasks.len();
        self.metrics.inc_tasks_dispatched(expected as u64);

        let (dispatcher, mut collector) = self.pool.batch();
        for task in tasks {
            dispatcher.dispatch(task).await?;
        }
        let collected = collector.collect(expected).await?;

        let entities = merge_entities(collected);
        debug!(tasks = expected, entities = entities.len(), "Discovery finished");
        Ok(entities)
    }
}

/// Merge entities sharing a type and identity, keeping first-seen order
///
/// Series already present are never overwritten; only missing metric types
/// and new relations are added.
pub fn merge_entities(entities: Vec<NormalizedEntity>) -> Vec<NormalizedEntity> {
    let mut merged: Vec<NormalizedEntity> = Vec::with_capacity(entities.len());
    let mut index: HashMap<(EntityType, String), usize> = HashMap::new();

    for entity in entities {
        let key = (entity.entity_type(), entity.id().to_string());
        match index.get(&key) {
            Some(&position) => absorb(&mut merged[position], entity),
            None => {
                index.insert(key, merged.len());
                merged.push(entity);
            }
        }
    }

    merged
}

fn absorb(target: &mut NormalizedEntity, other: NormalizedEntity) {
    for (metric, series) in other.metrics {
        if target.metrics.contains_key(&metric) {
            debug!(id = %target.id(), metric = %metric, "Keeping first series for duplicate entity");
            continue;
        }
        target.metrics.insert(metric, series);
    }
    for (name, value) in other.attributes {
        target.attributes.entry(name).or_insert(value);
    }
    for edge in other.part_of {
        target.add_part_of(edge);
    }
    for provider in other.providers {
        target.add_provider(provider);
    }
}
