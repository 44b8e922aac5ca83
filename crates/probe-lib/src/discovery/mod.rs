//! Metric discovery against time-series backends
//!
//! This module turns entity definitions into discovery tasks, runs them on
//! the worker pool and reconciles the raw samples they fetch into
//! normalized entities.

mod backend;
mod definition;
mod r#loop;
mod provider;
mod reconcile;
mod task;


pub use backend::{parse_response, PrometheusClient};
pub use definition::{AttributeDef, EntityDef, MetricDef, DEFAULT_DELIMITER};
pub use provider::{merge_entities, MetricProvider, ServerTarget};
pub use r#loop::{DiscoveryConfig, DiscoveryLoop, DiscoveryLoopBuilder, DiscoveryResult};
pub use reconcile::{reconcile, IdentityContext, Reconciled};
pub use task::EntityTask;

use crate::error::QueryError;
use crate::models::RawSample;

pub use async_trait::async_trait;

/// Executes textual queries against one metrics backend
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Run an instant query and return its samples
    async fn query(&self, query: &str) -> Result<Vec<RawSample>, QueryError>;

    /// Name of the backend, recorded as the source of discovered entities
    fn name(&self) -> &str;
}
