//! Error taxonomy for discovery
//!
//! Configuration errors are fatal at load time. Query and sample errors are
//! absorbed by the task that hit them; they only surface through logs and
//! counters. Aggregation warnings are never returned, only logged.

use crate::models::{EntityType, MetricType, QueryKind};
use thiserror::Error;

/// Malformed discovery configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("entity {entity_type} declares no identifier attribute")]
    MissingIdentifier { entity_type: EntityType },

    #[error("entity {entity_type} declares more than one identifier attribute: {names:?}")]
    DuplicateIdentifier {
        entity_type: EntityType,
        names: Vec<String>,
    },

    #[error("entity {entity_type} metric {metric} has no `used` query")]
    MissingUsedQuery {
        entity_type: EntityType,
        metric: MetricType,
    },

    #[error("entity {entity_type} metric {metric} has an empty {kind} query")]
    EmptyQuery {
        entity_type: EntityType,
        metric: MetricType,
        kind: QueryKind,
    },

    #[error("entity {entity_type} declares no metrics")]
    NoMetrics { entity_type: EntityType },

    #[error("attribute {attribute} has no source label")]
    MissingLabel { attribute: String },

    #[error("attribute {attribute} has an invalid pattern: {source}")]
    InvalidPattern {
        attribute: String,
        #[source]
        source: regex::Error,
    },

    #[error("attribute {attribute} pattern has {groups} capture groups but no replacement template")]
    MissingTemplate { attribute: String, groups: usize },

    #[error("server {server} references unknown exporter {exporter}")]
    UnknownExporter { server: String, exporter: String },

    #[error("server {server} has an invalid url: {reason}")]
    InvalidServerUrl { server: String, reason: String },

    #[error("business application {name} from {from} is declared more than once")]
    DuplicateBusinessApp { name: String, from: String },

    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Failure of a single backend query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("backend reported {error_type}: {error}")]
    Backend { error_type: String, error: String },

    #[error("unsupported result type {0}, only instant vectors are accepted")]
    UnsupportedResultType(String),
}

/// Failure of the worker pool itself, never of a task
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Reason a single raw sample was dropped
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("sample value {0} is not finite")]
    NonFinite(f64),

    #[error("identifier attribute {attribute} has no source label {labels:?}")]
    MissingIdentifierSource {
        attribute: String,
        labels: Vec<String>,
    },

    #[error("identifier attribute {attribute} value {value:?} does not match its pattern")]
    IdentifierMismatch { attribute: String, value: String },

    #[error("attribute {attribute} value {value:?} does not match its pattern")]
    AttributeMismatch { attribute: String, value: String },

    #[error("identifier attribute {attribute} expanded to an empty value")]
    EmptyIdentifier { attribute: String },
}

/// Non-fatal conditions seen while aggregating the infrastructure layer
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationWarning {
    /// Containers feeding one container spec report different GPU models
    MixedModels { spec_id: String, models: Vec<String> },
    /// Pod name matches no workload naming convention
    StandalonePod { pod: String },
}

impl std::fmt::Display for AggregationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationWarning::MixedModels { spec_id, models } => {
                write!(f, "container spec {} aggregates mixed GPU models {:?}", spec_id, models)
            }
            AggregationWarning::StandalonePod { pod } => {
                write!(f, "pod {} matches no workload naming convention", pod)
            }
        }
    }
}
