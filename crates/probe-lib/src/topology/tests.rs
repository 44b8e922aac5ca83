//! Infrastructure aggregation and layer routing tests

use super::*;
use crate::error::AggregationWarning;
use crate::models::{attrs, Controls, EntityType, MetricType, NormalizedEntity, QueryKind};

fn gpu(id: &str, node: &str, placement: Option<(&str, &str)>, used: f64) -> NormalizedEntity {
    let mut device = NormalizedEntity::new(EntityType::NvidiaGpu, id);
    device.attributes.insert(attrs::NODE.to_string(), node.to_string());
    device.attributes.insert(attrs::MODEL.to_string(), "A100".to_string());
    if let Some((pod, container)) = placement {
        device.attributes.insert(attrs::POD.to_string(), pod.to_string());
        device.attributes.insert(attrs::CONTAINER.to_string(), container.to_string());
        device.attributes.insert(attrs::NAMESPACE.to_string(), "ml".to_string());
    }
    device.record(MetricType::Gpu, QueryKind::Used, used);
    device.record(MetricType::Gpu, QueryKind::Capacity, 100.0);
    device
}

fn get<'e>(entities: &'e [NormalizedEntity], entity_type: EntityType, id: &str) -> &'e NormalizedEntity {
    entities
        .iter()
        .find(|e| e.entity_type() == entity_type && e.id() == id)
        .unwrap_or_else(|| panic!("missing {entity_type} {id}"))
}

fn gpu_used(entity: &NormalizedEntity) -> f64 {
    entity.series(MetricType::Gpu)[0].average
}

#[test]
fn test_single_container_spec_sums_devices() {
    let pod = "video-671194421-vpxkh";
    let devices = vec![
        gpu("gpu-0", "node-a", Some((pod, "encoder")), 30.0),
        gpu("gpu-1", "node-a", Some((pod, "encoder")), 50.0),
    ];

    let output = K8sTopologyBuilder::new(None).build(devices);

    let container = get(&output, EntityType::Container, "kubernetes/ml/video-671194421-vpxkh/encoder");
    assert_eq!(gpu_used(container), 80.0);
    assert_eq!(container.series(MetricType::Gpu)[0].capacity, Some(200.0));

    let spec = get(&output, EntityType::ContainerSpec, "kubernetes/ml/video/encoder");
    assert_eq!(gpu_used(spec), 80.0);
    assert!(container.is_part_of(EntityType::ContainerSpec, spec.id()));

    let node = get(&output, EntityType::Node, "kubernetes/node-a");
    assert_eq!(gpu_used(node), 80.0);
    let pod = get(&output, EntityType::ContainerPod, "kubernetes/ml/video-671194421-vpxkh");
    assert_eq!(gpu_used(pod), 80.0);
}

#[test]
fn test_spec_is_averaged_over_replicas() {
    let devices = vec![
        gpu("gpu-0", "node-a", Some(("video-671194421-vpxkh", "encoder")), 40.0),
        gpu("gpu-1", "node-b", Some(("video-671194421-q7w2z", "encoder")), 60.0),
    ];

    let (output, warnings) = K8sTopologyBuilder::new(Some("prod")).build_with_warnings(devices);
    assert!(warnings.is_empty());

    let spec = get(&output, EntityType::ContainerSpec, "prod/ml/video/encoder");
    assert_eq!(gpu_used(spec), 50.0);
    assert_eq!(spec.series(MetricType::Gpu)[0].capacity, Some(100.0));

    let workload = get(&output, EntityType::WorkloadController, "prod/ml/video");
    assert_eq!(workload.attribute(attrs::KIND), Some("Deployment"));
    assert!(workload.is_part_of(EntityType::Namespace, "prod/ml"));
}

#[test]
fn test_multi_device_replicas_sum_then_average() {
    let (first, second) = ("video-671194421-vpxkh", "video-671194421-q7w2z");
    let devices = vec![
        gpu("gpu-0", "node-a", Some((first, "encoder")), 10.0),
        gpu("gpu-1", "node-a", Some((first, "encoder")), 20.0),
        gpu("gpu-2", "node-b", Some((second, "encoder")), 30.0),
        gpu("gpu-3", "node-b", Some((second, "encoder")), 40.0),
    ];

    let output = K8sTopologyBuilder::new(None).build(devices);

    let container = get(&output, EntityType::Container, "kubernetes/ml/video-671194421-vpxkh/encoder");
    assert_eq!(gpu_used(container), 30.0);
    let container = get(&output, EntityType::Container, "kubernetes/ml/video-671194421-q7w2z/encoder");
    assert_eq!(gpu_used(container), 70.0);

    // (10 + 20 + 30 + 40) / 2 replicas
    let spec = get(&output, EntityType::ContainerSpec, "kubernetes/ml/video/encoder");
    assert_eq!(gpu_used(spec), 50.0);
    assert_eq!(spec.series(MetricType::Gpu)[0].capacity, Some(200.0));
}

#[test]
fn test_standalone_pod_has_no_workload_layer() {
    let devices = vec![gpu("gpu-0", "node-a", Some(("orphan", "main")), 10.0)];

    let (output, warnings) = K8sTopologyBuilder::new(None).build_with_warnings(devices);

    assert_eq!(
        warnings,
        vec![AggregationWarning::StandalonePod {
            pod: "orphan".to_string()
        }]
    );
    get(&output, EntityType::Node, "kubernetes/node-a");
    get(&output, EntityType::ContainerPod, "kubernetes/ml/orphan");
    get(&output, EntityType::Container, "kubernetes/ml/orphan/main");
    get(&output, EntityType::Application, "app-kubernetes/ml/orphan/main");
    assert!(output.iter().all(|e| !matches!(
        e.entity_type(),
        EntityType::ContainerSpec | EntityType::WorkloadController | EntityType::Namespace
    )));
}

#[test]
fn test_controls_and_cluster_commodity() {
    let devices = vec![gpu("gpu-0", "node-a", Some(("postgres-0", "db")), 5.0)];
    let output = K8sTopologyBuilder::new(None).build(devices);

    let node = get(&output, EntityType::Node, "kubernetes/node-a");
    let pod = get(&output, EntityType::ContainerPod, "kubernetes/ml/postgres-0");
    let container = get(&output, EntityType::Container, "kubernetes/ml/postgres-0/db");
    assert_eq!(node.controls, Some(Controls::movable()));
    assert_eq!(pod.controls, Some(Controls::movable()));
    assert_eq!(container.controls, Some(Controls::replicable()));
    assert!(container.controls.is_some_and(|c| c.provider_must_clone));

    let cluster = get(&output, EntityType::ContainerPlatformCluster, DEFAULT_CLUSTER);
    let commodity = &cluster.series(MetricType::Cluster)[0];
    assert_eq!(commodity.key.as_deref(), Some("kubernetes/A100"));
    assert_eq!(commodity.capacity, Some(CLUSTER_COMMODITY_CAPACITY));
    assert_eq!(commodity.average, 0.0);
    assert_eq!(node.series(MetricType::Cluster).len(), 1);
}

#[test]
fn test_mixed_models_warns() {
    let mut other = gpu("gpu-1", "node-b", Some(("video-671194421-q7w2z", "encoder")), 20.0);
    other
        .attributes
        .insert(attrs::MODEL.to_string(), "H100".to_string());
    let devices = vec![
        gpu("gpu-0", "node-a", Some(("video-671194421-vpxkh", "encoder")), 40.0),
        other,
    ];

    let (_, warnings) = K8sTopologyBuilder::new(None).build_with_warnings(devices);
    assert!(matches!(
        warnings.as_slice(),
        [AggregationWarning::MixedModels { models, .. }] if models.len() == 2
    ));
}

#[test]
fn test_devices_without_node_or_pod() {
    let mut nodeless = gpu("gpu-0", "node-a", None, 10.0);
    nodeless.attributes.remove(attrs::NODE);
    let idle = gpu("gpu-1", "node-b", None, 7.0);

    let output = K8sTopologyBuilder::new(None).build(vec![nodeless, idle]);

    let node = get(&output, EntityType::Node, "kubernetes/node-b");
    assert_eq!(gpu_used(node), 7.0);
    assert!(output.iter().all(|e| e.id() != "kubernetes/node-a"));
    assert!(output.iter().all(|e| e.entity_type() != EntityType::ContainerPod));
}

#[test]
fn test_assemble_routes_devices_and_business_entities() {
    let mut app = NormalizedEntity::new(EntityType::Application, "10.0.0.1");
    app.record(MetricType::ResponseTime, QueryKind::Used, 3.0);
    let devices = gpu("gpu-0", "node-a", None, 1.0);

    let topology = Topology::new(Vec::new(), None);
    let (output, counts) = topology.assemble(vec![app, devices]);

    // application + its service; cluster + node
    assert_eq!(counts, LayerCounts { business: 2, infrastructure: 2 });
    assert_eq!(output.len(), 4);
    assert!(output.iter().all(|e| !e.entity_type().is_device()));
}
