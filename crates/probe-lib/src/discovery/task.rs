//! Discovery task for one entity definition against one backend

use super::definition::EntityDef;
use super::reconcile::{reconcile, IdentityContext, Reconciled};
use super::QueryClient;
use crate::dispatch::{async_trait, Task};
use crate::error::SampleError;
use crate::models::{attrs, EntityType, HostedOn, NormalizedEntity, PartOf, RawSample};
use crate::observability::ProbeMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs every query of one entity definition and builds its entities
pub struct EntityTask {
    client: Arc<dyn QueryClient>,
    def: Arc<EntityDef>,
    context: Arc<IdentityContext>,
    metrics: ProbeMetrics,
}

impl EntityTask {
    pub fn new(
        client: Arc<dyn QueryClient>,
        def: Arc<EntityDef>,
        context: Arc<IdentityContext>,
    ) -> Self {
        Self {
            client,
            def,
            context,
            metrics: ProbeMetrics::new(),
        }
    }

    /// Query the backend and reconcile every sample
    ///
    /// A failed query is logged and skipped; a bad sample is dropped.
    pub async fn discover(&self) -> Vec<NormalizedEntity> {
        let mut builder = EntitySet::default();

        for metric in self.def.metrics() {
            for (kind, query) in metric.queries() {
                let start = Instant::now();
                let result = self.client.query(query).await;
                self.metrics
                    .observe_query_latency(start.elapsed().as_secs_f64());

                let samples = match result {
                    Ok(samples) => samples,
                    Err(e) => {
                        self.metrics.inc_query_errors();
                        warn!(
                            source = %self.client.name(),
                            entity_type = %self.def.entity_type(),
                            metric = %metric.metric_type(),
                            kind = %kind,
                            error = %e,
                            "Query failed, skipping"
                        );
                        continue;
                    }
                };

                for sample in samples {
                    match self.reconcile_sample(&sample) {
                        Ok(reconciled) => {
                            builder
                                .entry(reconciled, || self.create_entity())
                                .record(metric.metric_type(), kind, sample.value);
                        }
                        Err(e) => self.drop_sample(&e),
                    }
                }
            }
        }

        let entities = builder.into_entities();
        debug!(
            source = %self.client.name(),
            entity_type = %self.def.entity_type(),
            count = entities.len(),
            "Task discovered entities"
        );
        entities
    }

    fn reconcile_sample(&self, sample: &RawSample) -> Result<Reconciled, SampleError> {
        if !sample.value.is_finite() {
            return Err(SampleError::NonFinite(sample.value));
        }
        reconcile(&self.def, &sample.labels, &self.context)
    }

    fn drop_sample(&self, error: &SampleError) {
        let reason = match error {
            SampleError::NonFinite(_) => "non_finite",
            _ => "reconcile",
        };
        self.metrics.inc_dropped_samples(reason);
        debug!(
            entity_type = %self.def.entity_type(),
            error = %error,
            "Dropping sample"
        );
    }

    fn create_entity(&self) -> EntityTemplate {
        EntityTemplate {
            entity_type: self.def.entity_type(),
            hosted_on_vm: self.def.hosted_on_vm(),
            cluster_id: self.context.cluster_id.clone(),
            source: self.client.name().to_string(),
        }
    }
}

#[async_trait]
impl Task<NormalizedEntity> for EntityTask {
    async fn run(&self) -> Vec<NormalizedEntity> {
        self.discover().await
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.client.name(), self.def.entity_type())
    }
}

/// Per-task fields shared by every entity the task creates
struct EntityTemplate {
    entity_type: EntityType,
    hosted_on_vm: bool,
    cluster_id: Option<String>,
    source: String,
}

impl EntityTemplate {
    fn instantiate(self, reconciled: &Reconciled) -> NormalizedEntity {
        let mut entity = NormalizedEntity::new(self.entity_type, reconciled.id.clone());
        entity.display_name = Some(reconciled.raw_id.clone());
        entity.cluster_id = self.cluster_id;
        entity.source = Some(self.source);
        entity.hosted_on = Some(if self.hosted_on_vm {
            HostedOn::Vm {
                ip: reconciled
                    .attributes
                    .get(attrs::IP)
                    .cloned()
                    .unwrap_or_else(|| reconciled.raw_id.clone()),
            }
        } else {
            HostedOn::Container
        });
        entity
    }
}

/// Entities of one task, in first-seen order
#[derive(Default)]
struct EntitySet {
    entities: Vec<NormalizedEntity>,
    index: HashMap<String, usize>,
}

impl EntitySet {
    /// Look up or create the entity for a reconciled identity
    ///
    /// Attributes seen for the first time are merged into the entity.
    fn entry(
        &mut self,
        reconciled: Reconciled,
        template: impl FnOnce() -> EntityTemplate,
    ) -> &mut NormalizedEntity {
        let position = match self.index.get(&reconciled.id) {
            Some(&position) => position,
            None => {
                self.entities.push(template().instantiate(&reconciled));
                self.index
                    .insert(reconciled.id.clone(), self.entities.len() - 1);
                self.entities.len() - 1
            }
        };

        let entity = &mut self.entities[position];
        absorb_attributes(entity, reconciled.attributes);
        entity
    }

    fn into_entities(self) -> Vec<NormalizedEntity> {
        self.entities
    }
}

fn absorb_attributes(
    entity: &mut NormalizedEntity,
    attributes: std::collections::BTreeMap<String, String>,
) {
    for (name, value) in attributes {
        if entity.attributes.contains_key(&name) {
            continue;
        }
        match name.as_str() {
            attrs::NAMESPACE => entity.namespace = Some(value.clone()),
            attrs::SERVICE => entity.add_part_of(
                PartOf::new(EntityType::Service, value.clone()).labeled(value.clone()),
            ),
            _ => {}
        }
        entity.attributes.insert(name, value);
    }
}
