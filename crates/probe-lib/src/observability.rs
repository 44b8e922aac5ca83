//! Observability infrastructure for the metrics probe
//!
//! Provides:
//! - Prometheus metrics (cycle latency, query latency, entity counts, error counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::info;

/// Buckets for discovery cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Buckets for single backend queries (in seconds)
const QUERY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProbeMetricsInner> = OnceLock::new();

struct ProbeMetricsInner {
    discovery_cycle_seconds: Histogram,
    query_latency_seconds: Histogram,
    entities_discovered: IntGaugeVec,
    query_errors: IntCounter,
    dropped_samples: IntCounterVec,
    tasks_dispatched: IntCounter,
}

impl ProbeMetricsInner {
    fn new() -> Self {
        Self {
            discovery_cycle_seconds: register_histogram!(
                "metrics_probe_discovery_cycle_seconds",
                "Time spent on one full discovery cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register discovery_cycle_seconds"),

            query_latency_seconds: register_histogram!(
                "metrics_probe_query_latency_seconds",
                "Latency of individual backend queries",
                QUERY_BUCKETS.to_vec()
            )
            .expect("Failed to register query_latency_seconds"),

            entities_discovered: register_int_gauge_vec!(
                "metrics_probe_entities_discovered",
                "Entities produced by the last discovery cycle",
                &["layer"]
            )
            .expect("Failed to register entities_discovered"),

            query_errors: register_int_counter!(
                "metrics_probe_query_errors_total",
                "Backend queries that failed or returned an unsupported shape"
            )
            .expect("Failed to register query_errors"),

            dropped_samples: register_int_counter_vec!(
                "metrics_probe_dropped_samples_total",
                "Samples dropped before reaching an entity",
                &["reason"]
            )
            .expect("Failed to register dropped_samples"),

            tasks_dispatched: register_int_counter!(
                "metrics_probe_tasks_dispatched_total",
                "Discovery tasks handed to the worker pool"
            )
            .expect("Failed to register tasks_dispatched"),
        }
    }
}

/// Probe metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct ProbeMetrics {
    _private: (),
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProbeMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_discovery_cycle(&self, duration_secs: f64) {
        self.inner().discovery_cycle_seconds.observe(duration_secs);
    }

    pub fn observe_query_latency(&self, duration_secs: f64) {
        self.inner().query_latency_seconds.observe(duration_secs);
    }

    /// Set the entity count of one topology layer ("business" or "infrastructure")
    pub fn set_entities_discovered(&self, layer: &str, count: i64) {
        self.inner()
            .entities_discovered
            .with_label_values(&[layer])
            .set(count);
    }

    pub fn inc_query_errors(&self) {
        self.inner().query_errors.inc();
    }

    /// Count a dropped sample by reason ("non_finite" or "reconcile")
    pub fn inc_dropped_samples(&self, reason: &str) {
        self.inner()
            .dropped_samples
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_tasks_dispatched(&self, count: u64) {
        self.inner().tasks_dispatched.inc_by(count);
    }
}

/// Structured logger for probe events
#[derive(Clone)]
pub struct StructuredLogger {
    probe_id: String,
}

impl StructuredLogger {
    pub fn new(probe_id: impl Into<String>) -> Self {
        Self {
            probe_id: probe_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, servers: usize, workers: usize) {
        info!(
            event = "probe_started",
            probe = %self.probe_id,
            probe_version = %version,
            servers = servers,
            workers = workers,
            "Metrics probe started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "probe_shutdown",
            probe = %self.probe_id,
            reason = %reason,
            "Metrics probe shutting down"
        );
    }

    /// Log the outcome of one discovery cycle
    pub fn log_discovery_cycle(
        &self,
        cycle: u64,
        tasks: usize,
        discovered: usize,
        total: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "discovery_cycle",
            probe = %self.probe_id,
            cycle = cycle,
            tasks = tasks,
            discovered = discovered,
            total = total,
            elapsed_ms = elapsed_ms,
            "Discovery cycle complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_metrics_creation() {
        // Shares the process-global registry with every other test.
        let metrics = ProbeMetrics::new();

        metrics.observe_discovery_cycle(1.5);
        metrics.observe_query_latency(0.02);
        metrics.set_entities_discovered("business", 12);
        metrics.inc_query_errors();
        metrics.inc_dropped_samples("non_finite");
        metrics.inc_tasks_dispatched(4);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "metrics_probe_tasks_dispatched_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("probe-1");
        assert_eq!(logger.probe_id, "probe-1");
    }
}
