//! Core data models for the metrics probe

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Well-known attribute names produced by extraction rules
pub mod attrs {
    pub const IP: &str = "ip";
    pub const SERVICE: &str = "service";
    pub const NAMESPACE: &str = "namespace";
    pub const POD: &str = "pod";
    pub const CONTAINER: &str = "container";
    pub const NODE: &str = "node";
    pub const MODEL: &str = "model";
    pub const KIND: &str = "kind";
}

/// Category of a discovered or synthesized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Application,
    DatabaseServer,
    VirtualMachine,
    Service,
    BusinessTransaction,
    BusinessApplication,
    NvidiaGpu,
    EnergyProbe,
    Node,
    ContainerPlatformCluster,
    Namespace,
    WorkloadController,
    ContainerSpec,
    Container,
    ContainerPod,
}

impl EntityType {
    /// Device-level telemetry routed to the infrastructure builder
    pub fn is_device(&self) -> bool {
        matches!(self, EntityType::NvidiaGpu | EntityType::EnergyProbe)
    }

    /// Entities that get a synthetic service in the business layer
    pub fn yields_service(&self) -> bool {
        matches!(self, EntityType::Application | EntityType::DatabaseServer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Application => "application",
            EntityType::DatabaseServer => "databaseServer",
            EntityType::VirtualMachine => "virtualMachine",
            EntityType::Service => "service",
            EntityType::BusinessTransaction => "businessTransaction",
            EntityType::BusinessApplication => "businessApplication",
            EntityType::NvidiaGpu => "nvidiaGpu",
            EntityType::EnergyProbe => "energyProbe",
            EntityType::Node => "node",
            EntityType::ContainerPlatformCluster => "containerPlatformCluster",
            EntityType::Namespace => "namespace",
            EntityType::WorkloadController => "workloadController",
            EntityType::ContainerSpec => "containerSpec",
            EntityType::Container => "container",
            EntityType::ContainerPod => "containerPod",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a metric series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricType {
    ResponseTime,
    Transaction,
    Connection,
    Cpu,
    Memory,
    Heap,
    CollectionTime,
    Gpu,
    GpuMem,
    Energy,
    Cluster,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ResponseTime => "responseTime",
            MetricType::Transaction => "transaction",
            MetricType::Connection => "connection",
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::Heap => "heap",
            MetricType::CollectionTime => "collectionTime",
            MetricType::Gpu => "gpu",
            MetricType::GpuMem => "gpuMem",
            MetricType::Energy => "energy",
            MetricType::Cluster => "cluster",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a metric value a query produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Used,
    Capacity,
    Peak,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKind::Used => "used",
            QueryKind::Capacity => "capacity",
            QueryKind::Peak => "peak",
        })
    }
}

/// One row of an instant-vector query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl RawSample {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>, value: f64) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value,
        }
    }
}

/// One value of a metric series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub average: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl MetricValue {
    pub fn keyed(key: impl Into<String>, average: f64, capacity: f64) -> Self {
        Self {
            average,
            capacity: Some(capacity),
            peak: None,
            key: Some(key.into()),
        }
    }

    /// Record one sample of the given query kind, replacing any earlier one
    pub fn record(&mut self, kind: QueryKind, value: f64) {
        match kind {
            QueryKind::Used => self.average = value,
            QueryKind::Capacity => self.capacity = Some(value),
            QueryKind::Peak => self.peak = Some(value),
        }
    }

    /// Add another value into this one, component by component
    pub fn accumulate(&mut self, other: &MetricValue) {
        self.average += other.average;
        self.capacity = sum_opt(self.capacity, other.capacity);
        self.peak = sum_opt(self.peak, other.peak);
    }

    /// Divide average and capacity by a replica count
    pub fn scale_down(&mut self, replicas: usize) {
        let n = replicas as f64;
        self.average /= n;
        if let Some(capacity) = self.capacity.as_mut() {
            *capacity /= n;
        }
    }
}

fn sum_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Directed relation from a child entity to the entity that owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartOf {
    pub parent_type: EntityType,
    pub parent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PartOf {
    pub fn new(parent_type: EntityType, parent_id: impl Into<String>) -> Self {
        Self {
            parent_type,
            parent_id: parent_id.into(),
            label: None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Consumes-from relation to another entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRef {
    pub provider_type: EntityType,
    pub provider_id: String,
}

impl ProviderRef {
    pub fn new(provider_type: EntityType, provider_id: impl Into<String>) -> Self {
        Self {
            provider_type,
            provider_id: provider_id.into(),
        }
    }
}

/// Where an entity runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostedOn {
    Vm { ip: String },
    Container,
}

/// Action policy markings for infrastructure entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controls {
    pub controllable: bool,
    pub cloneable: bool,
    pub suspendable: bool,
    pub provider_must_clone: bool,
}

impl Controls {
    /// Node and pod policy
    pub fn movable() -> Self {
        Self {
            controllable: true,
            cloneable: true,
            suspendable: true,
            provider_must_clone: false,
        }
    }

    /// Container policy
    pub fn replicable() -> Self {
        Self {
            provider_must_clone: true,
            ..Self::movable()
        }
    }
}

/// Entity record produced by discovery and consumed by the topology builders
///
/// The identity is fixed at construction. Metric series and relations may
/// be merged afterwards while the record is owned by one task or builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEntity {
    id: String,
    entity_type: EntityType,
    pub display_name: Option<String>,
    pub namespace: Option<String>,
    pub cluster_id: Option<String>,
    pub source: Option<String>,
    pub hosted_on: Option<HostedOn>,
    pub proxy: bool,
    pub controls: Option<Controls>,
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<MetricType, Vec<MetricValue>>,
    pub part_of: Vec<PartOf>,
    pub providers: Vec<ProviderRef>,
}

impl NormalizedEntity {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type,
            display_name: None,
            namespace: None,
            cluster_id: None,
            source: None,
            hosted_on: None,
            proxy: false,
            controls: None,
            attributes: BTreeMap::new(),
            metrics: BTreeMap::new(),
            part_of: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Record one sample into the unkeyed value of a series
    pub fn record(&mut self, metric: MetricType, kind: QueryKind, value: f64) {
        let series = self.metrics.entry(metric).or_default();
        match series.iter_mut().find(|v| v.key.is_none()) {
            Some(existing) => existing.record(kind, value),
            None => {
                let mut fresh = MetricValue::default();
                fresh.record(kind, value);
                series.push(fresh);
            }
        }
    }

    /// Sum another entity's series into this one, matching values by key
    pub fn accumulate_metrics(&mut self, metrics: &BTreeMap<MetricType, Vec<MetricValue>>) {
        for (metric, values) in metrics {
            let series = self.metrics.entry(*metric).or_default();
            for value in values {
                match series.iter_mut().find(|v| v.key == value.key) {
                    Some(existing) => existing.accumulate(value),
                    None => series.push(value.clone()),
                }
            }
        }
    }

    /// Add a keyed value unless one with the same key already exists
    pub fn ensure_keyed(&mut self, metric: MetricType, value: MetricValue) {
        let series = self.metrics.entry(metric).or_default();
        if !series.iter().any(|v| v.key == value.key) {
            series.push(value);
        }
    }

    pub fn add_part_of(&mut self, edge: PartOf) {
        if !self.part_of.contains(&edge) {
            self.part_of.push(edge);
        }
    }

    pub fn add_provider(&mut self, provider: ProviderRef) {
        if !self.providers.contains(&provider) {
            self.providers.push(provider);
        }
    }

    pub fn is_part_of(&self, parent_type: EntityType, parent_id: &str) -> bool {
        self.part_of
            .iter()
            .any(|e| e.parent_type == parent_type && e.parent_id == parent_id)
    }

    /// Values of a series, empty when the metric was never recorded
    pub fn series(&self, metric: MetricType) -> &[MetricValue] {
        self.metrics.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }
}
