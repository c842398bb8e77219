//! Observability infrastructure for the daemon supervisor
//!
//! Provides:
//! - Prometheus metrics (request latency, errors, hot swaps, dumps, pool usage)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DaemonMetricsInner> = OnceLock::new();

struct DaemonMetricsInner {
    request_latency_seconds: Histogram,
    predictions_total: IntCounter,
    prediction_errors_total: IntCounter,
    hot_swaps_total: IntCounter,
    dump_failures_total: IntCounter,
    active_port: IntGauge,
    live_workers: IntGauge,
    pool_connections_in_use: IntGauge,
}

impl DaemonMetricsInner {
    fn new() -> Self {
        Self {
            request_latency_seconds: register_histogram!(
                "vwd_request_latency_seconds",
                "Round trip time of prediction batches sent to the daemon",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_latency_seconds"),

            predictions_total: register_int_counter!(
                "vwd_predictions_total",
                "Total number of predictions returned by the daemon"
            )
            .expect("Failed to register predictions_total"),

            prediction_errors_total: register_int_counter!(
                "vwd_prediction_errors_total",
                "Total number of failed prediction batches"
            )
            .expect("Failed to register prediction_errors_total"),

            hot_swaps_total: register_int_counter!(
                "vwd_hot_swaps_total",
                "Number of times the daemon was recreated on its standby port"
            )
            .expect("Failed to register hot_swaps_total"),

            dump_failures_total: register_int_counter!(
                "vwd_dump_failures_total",
                "Number of model dump requests that failed"
            )
            .expect("Failed to register dump_failures_total"),

            active_port: register_int_gauge!(
                "vwd_active_port",
                "Port of the daemon currently serving requests"
            )
            .expect("Failed to register active_port"),

            live_workers: register_int_gauge!(
                "vwd_live_workers",
                "Daemon processes counted by the last worker sample"
            )
            .expect("Failed to register live_workers"),

            pool_connections_in_use: register_int_gauge!(
                "vwd_pool_connections_in_use",
                "Pooled daemon connections currently checked out"
            )
            .expect("Failed to register pool_connections_in_use"),
        }
    }
}

/// Handle to the process-wide supervisor metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DaemonMetrics {
    _private: (),
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DaemonMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DaemonMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a completed prediction batch
    pub fn observe_request(&self, duration_secs: f64, predictions: usize) {
        self.inner().request_latency_seconds.observe(duration_secs);
        self.inner().predictions_total.inc_by(predictions as u64);
    }

    pub fn inc_prediction_errors(&self) {
        self.inner().prediction_errors_total.inc();
    }

    pub fn inc_hot_swaps(&self) {
        self.inner().hot_swaps_total.inc();
    }

    pub fn inc_dump_failures(&self) {
        self.inner().dump_failures_total.inc();
    }

    pub fn set_active_port(&self, port: u16) {
        self.inner().active_port.set(i64::from(port));
    }

    /// Publish a fresh count of the serving daemon's processes
    pub fn set_live_workers(&self, workers: usize) {
        self.inner().live_workers.set(workers as i64);
    }

    pub fn set_pool_in_use(&self, in_use: usize) {
        self.inner().pool_connections_in_use.set(in_use as i64);
    }
}

/// Structured logger for daemon lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a daemon that reached its full worker count
    pub fn log_daemon_started(&self, port: u16, children: usize, model: Option<&Path>) {
        info!(
            event = "daemon_started",
            instance = %self.instance,
            port = port,
            children = children,
            model = ?model,
            "Prediction daemon started"
        );
    }

    pub fn log_daemon_stopped(&self, port: u16) {
        info!(
            event = "daemon_stopped",
            instance = %self.instance,
            port = port,
            "Prediction daemon stopped"
        );
    }

    /// Log a completed hot swap
    pub fn log_hot_swap(&self, old_port: u16, new_port: u16) {
        info!(
            event = "daemon_hot_swapped",
            instance = %self.instance,
            old_port = old_port,
            new_port = new_port,
            "Daemon recreated on standby port"
        );
    }

    /// Log the outcome of a model dump request
    pub fn log_model_dump(&self, path: &Path, error: Option<&str>) {
        match error {
            None => info!(
                event = "model_dumped",
                instance = %self.instance,
                path = %path.display(),
                "Model dump requested"
            ),
            Some(error) => warn!(
                event = "model_dump_failed",
                instance = %self.instance,
                path = %path.display(),
                error = %error,
                "Failed to dump the model"
            ),
        }
    }

    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            port = port,
            "Supervisor agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Supervisor agent shutting down"
        );
    }
}
