//! Topology assembly
//!
//! Device telemetry goes to the infrastructure builder, everything else to
//! the business builder. Each entity is routed to exactly one of them.

mod business;
mod k8s;
mod workload;

#[cfg(test)]
mod tests;

pub use business::TopologyBuilder;
pub use k8s::{K8sTopologyBuilder, CLUSTER_COMMODITY_CAPACITY, DEFAULT_CLUSTER};
pub use workload::{extract_workload_name, WorkloadKind};

use crate::config::BusinessAppConfig;
use crate::models::NormalizedEntity;
use serde::Serialize;

/// Entity counts per layer of one assembled topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerCounts {
    pub business: usize,
    pub infrastructure: usize,
}

/// Static inputs of both builders
#[derive(Debug, Clone, Default)]
pub struct Topology {
    business_apps: Vec<BusinessAppConfig>,
    cluster_id: Option<String>,
}

impl Topology {
    pub fn new(business_apps: Vec<BusinessAppConfig>, cluster_id: Option<String>) -> Self {
        Self {
            business_apps,
            cluster_id,
        }
    }

    /// Route every entity to its builder and concatenate both outputs
    pub fn assemble(&self, entities: Vec<NormalizedEntity>) -> (Vec<NormalizedEntity>, LayerCounts) {
        let (devices, others): (Vec<_>, Vec<_>) = entities
            .into_iter()
            .partition(|e| e.entity_type().is_device());

        let mut output = TopologyBuilder::new(&self.business_apps).build(others);
        let business = output.len();

        let infrastructure = if devices.is_empty() {
            Vec::new()
        } else {
            K8sTopologyBuilder::new(self.cluster_id.as_deref()).build(devices)
        };
        let counts = LayerCounts {
            business,
            infrastructure: infrastructure.len(),
        };

        output.extend(infrastructure);
        (output, counts)
    }
}
