//! HTTP API for health checks, Prometheus metrics and the last topology

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use probe_lib::{
    health::{ComponentStatus, HealthRegistry},
    topology::LayerCounts,
    DiscoveryResult, NormalizedEntity,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Topology produced by the most recent discovery cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    pub cycle: u64,
    pub elapsed_ms: u64,
    pub counts: LayerCounts,
    pub discovered_at: i64,
    pub entities: Vec<NormalizedEntity>,
}

impl From<DiscoveryResult> for TopologySnapshot {
    fn from(result: DiscoveryResult) -> Self {
        Self {
            cycle: result.cycle,
            elapsed_ms: result.elapsed.as_millis() as u64,
            counts: result.counts,
            discovered_at: chrono::Utc::now().timestamp(),
            entities: result.entities,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    snapshot: RwLock<Option<Arc<TopologySnapshot>>>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry) -> Self {
        Self {
            health_registry,
            snapshot: RwLock::new(None),
        }
    }

    /// Replace the served topology with a newer cycle's result
    pub async fn publish(&self, result: DiscoveryResult) {
        *self.snapshot.write().await = Some(Arc::new(result.into()));
    }
}

/// 200 while operational (healthy or degraded), 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 once the first discovery cycle completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn topology(State(state): State<Arc<AppState>>) -> Response {
    match state.snapshot.read().await.clone() {
        Some(snapshot) => Json(snapshot.as_ref()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No discovery cycle completed yet").into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/topology", get(topology))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
