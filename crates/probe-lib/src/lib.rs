//! Metrics discovery probe library
//!
//! This crate provides the core functionality for:
//! - Querying Prometheus-compatible backends for configured entity types
//! - Reconciling sample labels into entity identities and attributes
//! - Running discovery tasks on a bounded worker pool
//! - Building the business and Kubernetes infrastructure topologies
//! - Health checks and observability

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod topology;

pub use config::ProbeConfig;
pub use discovery::{DiscoveryLoop, DiscoveryLoopBuilder, DiscoveryResult, MetricProvider};
pub use error::{ConfigError, DispatchError, QueryError, SampleError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProbeMetrics, StructuredLogger};
pub use topology::Topology;
