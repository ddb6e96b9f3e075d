//! Observability infrastructure for the outlier pipeline
//!
//! Provides:
//! - Prometheus metrics (check cycle latency, detection failures, reported incidents)
//! - Structured JSON logging of pipeline events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{IncidentLevel, IncidentLog};

/// Histogram buckets for check cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    check_cycle_seconds: Histogram,
    datasets_scanned: IntGauge,
    detection_failures: IntCounter,
    results_emitted: IntCounter,
    incidents_reported: IntCounterVec,
    log_persist_errors: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            check_cycle_seconds: register_histogram!(
                "outlier_check_cycle_seconds",
                "Time spent on one periodic check cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register check_cycle_seconds"),

            datasets_scanned: register_int_gauge!(
                "outlier_datasets_scanned",
                "Number of datasets scanned in the last check cycle"
            )
            .expect("Failed to register datasets_scanned"),

            detection_failures: register_int_counter!(
                "outlier_detection_failures_total",
                "Metric detection runs skipped because of an error"
            )
            .expect("Failed to register detection_failures"),

            results_emitted: register_int_counter!(
                "outlier_results_emitted_total",
                "Detection results handed to the reporter"
            )
            .expect("Failed to register results_emitted"),

            incidents_reported: register_int_counter_vec!(
                "outlier_incidents_reported_total",
                "Novel incidents reported, by level",
                &["level"]
            )
            .expect("Failed to register incidents_reported"),

            log_persist_errors: register_int_counter!(
                "outlier_log_persist_errors_total",
                "Failures to load or write the incident log"
            )
            .expect("Failed to register log_persist_errors"),
        }
    }
}

/// Handle to the process-wide pipeline metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_check_cycle(&self, duration_secs: f64) {
        self.inner().check_cycle_seconds.observe(duration_secs);
    }

    pub fn set_datasets_scanned(&self, count: i64) {
        self.inner().datasets_scanned.set(count);
    }

    pub fn add_detection_failures(&self, count: u64) {
        self.inner().detection_failures.inc_by(count);
    }

    pub fn inc_results_emitted(&self) {
        self.inner().results_emitted.inc();
    }

    pub fn inc_incidents_reported(&self, level: IncidentLevel) {
        self.inner()
            .incidents_reported
            .with_label_values(&[level.as_str()])
            .inc();
    }

    pub fn inc_log_persist_errors(&self) {
        self.inner().log_persist_errors.inc();
    }
}

/// Structured logger for pipeline events
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

    /// Log a newly reported incident. Alarms log at warn level.
    pub fn log_incident(&self, log: &IncidentLog) {
        match log.level {
            IncidentLevel::Alarm => {
                warn!(
                    event = "incident_reported",
                    instance = %self.instance,
                    site_id = %log.site_id,
                    method = %log.method,
                    time_ago = %log.time_ago,
                    time_step = %log.time_step,
                    period_start = %log.period_start,
                    period_end = %log.period_end,
                    metric = %log.metric,
                    attribute = %log.attribute,
                    level = %log.level,
                    "Outlier alarm"
                );
            }
            IncidentLevel::Warning => {
                info!(
                    event = "incident_reported",
                    instance = %self.instance,
                    site_id = %log.site_id,
                    method = %log.method,
                    time_ago = %log.time_ago,
                    time_step = %log.time_step,
                    period_start = %log.period_start,
                    period_end = %log.period_end,
                    metric = %log.metric,
                    attribute = %log.attribute,
                    level = %log.level,
                    "Outlier warning"
                );
            }
        }
    }

    /// Log the summary of one check cycle
    pub fn log_cycle(&self, datasets: usize, results: usize, failures: usize, elapsed_ms: u128) {
        info!(
            event = "check_cycle_complete",
            instance = %self.instance,
            datasets = datasets,
            results = results,
            failures = failures,
            elapsed_ms = elapsed_ms,
            "Check cycle complete"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            "Outlier agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Outlier agent shutting down"
        );
    }
}
