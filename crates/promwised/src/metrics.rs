//! Self-metrics for promwised, exported at `/metrics`.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use promwise_common::ErrorKind;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline and backend metrics
#[derive(Clone)]
pub struct AgentMetrics {
    pub pipeline_runs_total: IntCounterVec,
    pub pipeline_duration_seconds: HistogramVec,
    pub backend_errors_total: IntCounterVec,
    pub dropped_items_total: IntCounterVec,

    registry: Arc<Registry>,
}

impl AgentMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let pipeline_runs_total = register_int_counter_vec_with_registry!(
            "promwise_pipeline_runs_total",
            "Pipeline runs by terminal outcome",
            &["pipeline", "outcome"],
            registry
        )?;

        let pipeline_duration_seconds = register_histogram_vec_with_registry!(
            "promwise_pipeline_duration_seconds",
            "Pipeline wall time in seconds",
            &["pipeline"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            registry
        )?;

        let backend_errors_total = register_int_counter_vec_with_registry!(
            "promwise_backend_errors_total",
            "Backend call failures by backend and error kind",
            &["backend", "kind"],
            registry
        )?;

        let dropped_items_total = register_int_counter_vec_with_registry!(
            "promwise_dropped_items_total",
            "Items dropped by partial-success sweeps",
            &["pipeline"],
            registry
        )?;

        Ok(Self {
            pipeline_runs_total,
            pipeline_duration_seconds,
            backend_errors_total,
            dropped_items_total,
            registry: Arc::new(registry),
        })
    }

    /// Record a finished pipeline run
    pub fn record_run(&self, pipeline: &str, outcome: &str, started: Instant) {
        self.pipeline_runs_total
            .with_label_values(&[pipeline, outcome])
            .inc();
        self.pipeline_duration_seconds
            .with_label_values(&[pipeline])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn record_backend_error(&self, backend: &str, kind: ErrorKind) {
        self.backend_errors_total
            .with_label_values(&[backend, kind.as_str()])
            .inc();
    }

    pub fn record_dropped(&self, pipeline: &str) {
        self.dropped_items_total.with_label_values(&[pipeline]).inc();
    }

    pub fn runs(&self, pipeline: &str, outcome: &str) -> u64 {
        self.pipeline_runs_total
            .with_label_values(&[pipeline, outcome])
            .get()
    }

    pub fn dropped(&self, pipeline: &str) -> u64 {
        self.dropped_items_total.with_label_values(&[pipeline]).get()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
