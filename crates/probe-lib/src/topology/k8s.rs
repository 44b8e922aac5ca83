//! Infrastructure topology built from GPU and energy device telemetry
//!
//! Each device record belongs to at most one container. Device metrics are
//! summed into the container, pod, node and container spec they feed; a
//! container spec fed by several containers is then averaged per replica.

use super::workload::extract_workload_name;
use crate::error::AggregationWarning;
use crate::models::{
    attrs, Controls, EntityType, HostedOn, MetricType, MetricValue, NormalizedEntity, PartOf,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, warn};

/// Cluster name used when no cluster id is configured
pub const DEFAULT_CLUSTER: &str = "kubernetes";

/// Capacity of the cluster commodity; large enough to never constrain placement
pub const CLUSTER_COMMODITY_CAPACITY: f64 = 1.0e10;

const UNKNOWN_MODEL: &str = "unknown";

/// Builds the node/cluster/pod/container/workload graph for one cycle
///
/// Consumed by [`K8sTopologyBuilder::build`]; nothing outlives the cycle.
pub struct K8sTopologyBuilder {
    cluster: String,
    entities: Vec<NormalizedEntity>,
    index: HashMap<(EntityType, String), usize>,
    spec_containers: HashMap<String, BTreeSet<String>>,
    spec_models: HashMap<String, BTreeSet<String>>,
    warnings: Vec<AggregationWarning>,
}

impl K8sTopologyBuilder {
    pub fn new(cluster_id: Option<&str>) -> Self {
        Self {
            cluster: cluster_id
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CLUSTER)
                .to_string(),
            entities: Vec::new(),
            index: HashMap::new(),
            spec_containers: HashMap::new(),
            spec_models: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Fold every device record into the graph and return its entities
    pub fn build(self, devices: Vec<NormalizedEntity>) -> Vec<NormalizedEntity> {
        self.build_with_warnings(devices).0
    }

    /// Same as [`build`](Self::build), also returning what was logged as warnings
    pub fn build_with_warnings(
        mut self,
        devices: Vec<NormalizedEntity>,
    ) -> (Vec<NormalizedEntity>, Vec<AggregationWarning>) {
        for device in &devices {
            self.add_device(device);
        }
        self.average_specs();
        (self.entities, self.warnings)
    }

    fn add_device(&mut self, device: &NormalizedEntity) {
        let Some(node_name) = device.attribute(attrs::NODE).map(str::to_string) else {
            warn!(device = %device.id(), "Device has no node, skipping");
            return;
        };
        let model = device
            .attribute(attrs::MODEL)
            .unwrap_or(UNKNOWN_MODEL)
            .to_string();
        let cluster_commodity = MetricValue::keyed(
            format!("{}/{}", self.cluster, model),
            0.0,
            CLUSTER_COMMODITY_CAPACITY,
        );

        let cluster_id = self.cluster.clone();
        let cluster = self.entry(EntityType::ContainerPlatformCluster, &cluster_id, |e| {
            e.display_name = Some(cluster_id.clone());
        });
        cluster.ensure_keyed(MetricType::Cluster, cluster_commodity.clone());

        let node_id = format!("{}/{}", self.cluster, node_name);
        let node = self.entry(EntityType::Node, &node_id, |e| {
            e.display_name = Some(node_name.clone());
            e.controls = Some(Controls::movable());
            e.add_part_of(PartOf::new(EntityType::ContainerPlatformCluster, cluster_id.clone()));
        });
        node.accumulate_metrics(&device.metrics);
        node.ensure_keyed(MetricType::Cluster, cluster_commodity.clone());

        let Some(pod_name) = device.attribute(attrs::POD).map(str::to_string) else {
            debug!(device = %device.id(), "Device is not assigned to a pod");
            return;
        };
        let namespace = device
            .attribute(attrs::NAMESPACE)
            .or(device.namespace.as_deref())
            .unwrap_or("default")
            .to_string();

        let pod_id = format!("{}/{}/{}", self.cluster, namespace, pod_name);
        let pod = self.entry(EntityType::ContainerPod, &pod_id, |e| {
            e.display_name = Some(pod_name.clone());
            e.namespace = Some(namespace.clone());
            e.controls = Some(Controls::movable());
            e.add_part_of(PartOf::new(EntityType::Node, node_id.clone()));
        });
        pod.accumulate_metrics(&device.metrics);
        pod.ensure_keyed(MetricType::Cluster, cluster_commodity);

        let Some(container_name) = device.attribute(attrs::CONTAINER).map(str::to_string) else {
            debug!(device = %device.id(), pod = %pod_name, "Device has no container");
            return;
        };

        let container_id = format!("{}/{}", pod_id, container_name);
        let container = self.entry(EntityType::Container, &container_id, |e| {
            e.display_name = Some(container_name.clone());
            e.namespace = Some(namespace.clone());
            e.hosted_on = Some(HostedOn::Container);
            e.controls = Some(Controls::replicable());
            e.add_part_of(PartOf::new(EntityType::ContainerPod, pod_id.clone()));
        });
        container.accumulate_metrics(&device.metrics);

        self.entry(EntityType::Application, &format!("app-{}", container_id), |e| {
            e.display_name = Some(container_name.clone());
            e.namespace = Some(namespace.clone());
            e.hosted_on = Some(HostedOn::Container);
            e.add_part_of(PartOf::new(EntityType::Container, container_id.clone()));
        });

        let Some((workload_name, kind)) = extract_workload_name(&pod_name) else {
            self.warn_once(AggregationWarning::StandalonePod { pod: pod_name });
            return;
        };

        let namespace_id = format!("{}/{}", self.cluster, namespace);
        self.entry(EntityType::Namespace, &namespace_id, |e| {
            e.display_name = Some(namespace.clone());
            e.add_part_of(PartOf::new(EntityType::ContainerPlatformCluster, cluster_id.clone()));
        });

        let workload_id = format!("{}/{}", namespace_id, workload_name);
        self.entry(EntityType::WorkloadController, &workload_id, |e| {
            e.display_name = Some(workload_name.clone());
            e.namespace = Some(namespace.clone());
            e.attributes.insert(attrs::KIND.to_string(), kind.to_string());
            e.add_part_of(PartOf::new(EntityType::Namespace, namespace_id.clone()));
        });

        let spec_id = format!("{}/{}", workload_id, container_name);
        let spec = self.entry(EntityType::ContainerSpec, &spec_id, |e| {
            e.display_name = Some(container_name.clone());
            e.namespace = Some(namespace.clone());
            e.add_part_of(PartOf::new(EntityType::WorkloadController, workload_id.clone()));
        });
        spec.accumulate_metrics(&device.metrics);

        self.entry(EntityType::Container, &container_id, |_| {})
            .add_part_of(PartOf::new(EntityType::ContainerSpec, spec_id.clone()));

        self.spec_containers
            .entry(spec_id.clone())
            .or_default()
            .insert(container_id);
        self.spec_models.entry(spec_id).or_default().insert(model);
    }

    /// Look up or create an entity; `init` runs only on creation
    fn entry(
        &mut self,
        entity_type: EntityType,
        id: &str,
        init: impl FnOnce(&mut NormalizedEntity),
    ) -> &mut NormalizedEntity {
        let key = (entity_type, id.to_string());
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let mut entity = NormalizedEntity::new(entity_type, id);
                entity.cluster_id = Some(self.cluster.clone());
                init(&mut entity);
                self.entities.push(entity);
                self.index.insert(key, self.entities.len() - 1);
                self.entities.len() - 1
            }
        };
        &mut self.entities[position]
    }

    /// Divide container spec metrics by the number of containers that fed them
    fn average_specs(&mut self) {
        for (spec_id, containers) in &self.spec_containers {
            let replicas = containers.len();
            if let Some(models) = self.spec_models.get(spec_id).filter(|m| m.len() > 1) {
                let warning = AggregationWarning::MixedModels {
                    spec_id: spec_id.clone(),
                    models: models.iter().cloned().collect(),
                };
                warn!(spec = %spec_id, details = %warning, "Mixed GPU models in container spec");
                self.warnings.push(warning);
            }

            if replicas < 2 {
                continue;
            }

            let key = (EntityType::ContainerSpec, spec_id.clone());
            if let Some(&position) = self.index.get(&key) {
                for series in self.entities[position].metrics.values_mut() {
                    for value in series.iter_mut() {
                        value.scale_down(replicas);
                    }
                }
            }
        }
    }

    fn warn_once(&mut self, warning: AggregationWarning) {
        if !self.warnings.contains(&warning) {
            error!(details = %warning, "Building standalone pod without workload layer");
            self.warnings.push(warning);
        }
    }
}
