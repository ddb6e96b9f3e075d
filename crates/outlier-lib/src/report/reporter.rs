//! Reporter task
//!
//! Consumes detection results, drops incidents already in the log and
//! reports the rest. Results are processed concurrently up to
//! `max_concurrent_reports`; the log's read-modify-write is serialized by
//! the store's transaction lock.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::{IncidentLogStore, LogStoreError, ReportSink};
use crate::health::{components, HealthRegistry};
use crate::models::{DetectionResult, IncidentLog};
use crate::observability::PipelineMetrics;

/// Default cap on results processed at once
pub const DEFAULT_MAX_CONCURRENT_REPORTS: usize = 8;

/// Configuration for the reporter
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Maximum number of results processed concurrently (default: 8)
    pub max_concurrent_reports: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reports: DEFAULT_MAX_CONCURRENT_REPORTS,
        }
    }
}

/// What happened to one detection result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportSummary {
    /// Incidents reported as new, alarms first
    pub reported: Vec<IncidentLog>,
    /// Whether the new incidents made it into the log
    pub persisted: bool,
}

/// Deduplicating reporter
pub struct Reporter {
    store: Arc<IncidentLogStore>,
    sink: Arc<dyn ReportSink>,
    health: Option<HealthRegistry>,
    metrics: PipelineMetrics,
    config: ReporterConfig,
}

impl Reporter {
    pub fn new(store: Arc<IncidentLogStore>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            store,
            sink,
            health: None,
            metrics: PipelineMetrics::new(),
            config: ReporterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReporterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Report the novel incidents of one result.
    ///
    /// Persistence is best effort: if the log cannot be read every incident
    /// is reported and nothing is written; if the write fails the reports
    /// still go out. When the log lock times out the incidents are still
    /// checked against an unlocked read of the log, but not persisted.
    pub async fn process(&self, result: &DetectionResult) -> ReportSummary {
        if result.result.is_empty() {
            return ReportSummary {
                reported: Vec::new(),
                persisted: true,
            };
        }

        let (reported, persisted) = match self.store.begin().await {
            Ok(mut txn) => {
                let novel = novel_incidents(txn.entries(), result);
                for log in &novel {
                    txn.append(log.clone());
                }

                match txn.commit().await {
                    Ok(_) => {
                        self.log_store_ok().await;
                        (novel, true)
                    }
                    Err(e) => {
                        self.log_store_failed(result, &e).await;
                        (novel, false)
                    }
                }
            }
            Err(e @ LogStoreError::LockTimeout(_)) => {
                self.log_store_failed(result, &e).await;
                match self.store.load().await {
                    Ok(existing) => (novel_incidents(&existing, result), false),
                    Err(_) => (all_incidents(result), false),
                }
            }
            Err(e) => {
                self.log_store_failed(result, &e).await;
                (all_incidents(result), false)
            }
        };

        debug!(
            site_id = %result.site_id,
            method = %result.method,
            incidents = result.result.len(),
            novel = reported.len(),
            persisted,
            "Detection result processed"
        );

        for log in &reported {
            self.metrics.inc_incidents_reported(log.level);
            if let Err(e) = self.sink.send(log).await {
                warn!(
                    site_id = %log.site_id,
                    metric = %log.metric,
                    error = %e,
                    "Failed to deliver incident report"
                );
            }
        }

        ReportSummary {
            reported,
            persisted,
        }
    }

    /// Run until the result channel closes or shutdown is signalled.
    /// In-flight results are always finished before returning.
    pub async fn run(
        self: Arc<Self>,
        mut results: mpsc::UnboundedReceiver<DetectionResult>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let max_in_flight = self.config.max_concurrent_reports.max(1);
        info!(max_in_flight, "Starting outlier reporter");
        if let Some(health) = &self.health {
            health.set_healthy(components::REPORTER).await;
        }

        let permits = Arc::new(Semaphore::new(max_in_flight));
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = results.recv() => {
                    let Some(result) = received else {
                        debug!("Detection result channel closed");
                        break;
                    };

                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let reporter = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        reporter.process(&result).await;
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        self.task_failed(&e).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down outlier reporter");
                    break;
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight reports");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                self.task_failed(&e).await;
            }
        }

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::REPORTER, "reporter stopped")
                .await;
        }
        info!("Outlier reporter stopped");
    }

    async fn task_failed(&self, error: &JoinError) {
        warn!(error = %error, "Reporting task failed");
        if let Some(health) = &self.health {
            health
                .set_degraded(components::REPORTER, error.to_string())
                .await;
        }
    }

    async fn log_store_ok(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::LOG_STORE).await;
        }
    }

    async fn log_store_failed(&self, result: &DetectionResult, error: &LogStoreError) {
        self.metrics.inc_log_persist_errors();
        warn!(
            site_id = %result.site_id,
            method = %result.method,
            path = %self.store.path().display(),
            error = %error,
            "Incident log unavailable, reporting without persisting"
        );
        if let Some(health) = &self.health {
            health
                .set_degraded(components::LOG_STORE, error.to_string())
                .await;
        }
    }
}

fn all_incidents(result: &DetectionResult) -> Vec<IncidentLog> {
    result
        .result
        .iter()
        .map(|(level, incident)| IncidentLog::new(result, incident, level))
        .collect()
}

/// Incidents of `result` not yet present among `existing` entries of the
/// same site and method. Duplicates inside the result collapse to one.
fn novel_incidents(existing: &[IncidentLog], result: &DetectionResult) -> Vec<IncidentLog> {
    let known: Vec<&IncidentLog> = existing
        .iter()
        .filter(|l| l.belongs_to(&result.site_id, &result.method))
        .collect();

    let mut novel: Vec<IncidentLog> = Vec::new();
    for (level, incident) in result.result.iter() {
        let seen = known.iter().any(|l| incident.matches_log(l))
            || novel.iter().any(|l| incident.matches_log(l));
        if !seen {
            novel.push(IncidentLog::new(result, incident, level));
        }
    }
    novel
}
