//! Periodic check loop
//!
//! Every interval the checker reloads the dataset configurations, refreshes
//! each dataset's samples, scans them and pushes every result that holds
//! incidents onto an unbounded channel for the reporter.

use super::DetectionService;
use crate::health::{components, HealthRegistry};
use crate::models::DetectionResult;
use crate::observability::{PipelineMetrics, StructuredLogger};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Configuration for the periodic checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Time between check cycles (default: 5 minutes)
    pub interval: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// Counters of one check cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Datasets scanned
    pub datasets: usize,
    /// Results handed to the reporter
    pub results: usize,
    /// Metric runs or sample fetches that failed
    pub failures: usize,
    /// The dataset configuration could not be loaded
    pub skipped: bool,
}

/// Runs detection over every dataset on a fixed interval
pub struct PeriodicChecker {
    service: Arc<DetectionService>,
    config: CheckerConfig,
    results_tx: mpsc::UnboundedSender<DetectionResult>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    metrics: PipelineMetrics,
}

impl PeriodicChecker {
    /// Create a checker and the receiving end of its result channel
    pub fn new(
        service: Arc<DetectionService>,
        config: CheckerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DetectionResult>) {
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let checker = Self {
            service,
            config,
            results_tx,
            health: None,
            logger: StructuredLogger::new(env!("CARGO_PKG_NAME")),
            metrics: PipelineMetrics::new(),
        };

        (checker, results_rx)
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run cycles until shutdown. The first cycle starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting periodic outlier checker"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down periodic outlier checker");
                    break;
                }
            }
        }
    }

    /// Run one check cycle over all datasets
    pub async fn run_cycle(&self) -> CycleStats {
        let start = Instant::now();
        let mut stats = CycleStats::default();

        let datasets = match self.service.datasets().await {
            Ok(datasets) => datasets,
            Err(e) => {
                warn!(error = %e, "Failed to load dataset configurations, skipping cycle");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::CHECKER, format!("cycle skipped: {e}"))
                        .await;
                }
                stats.skipped = true;
                return stats;
            }
        };

        for dataset in &datasets {
            stats.datasets += 1;

            let outcome = match self.service.scan_dataset(dataset).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    stats.failures += 1;
                    warn!(
                        site_id = %dataset.site_id,
                        error = %e,
                        "Failed to fetch samples"
                    );
                    continue;
                }
            };

            stats.failures += outcome.failures;
            self.metrics.add_detection_failures(outcome.failures as u64);

            for result in outcome.results {
                if result.result.is_empty() {
                    continue;
                }
                if self.results_tx.send(result).is_err() {
                    warn!(site_id = %dataset.site_id, "Reporter channel closed, dropping result");
                    continue;
                }
                stats.results += 1;
                self.metrics.inc_results_emitted();
            }
        }

        let elapsed = start.elapsed();
        self.metrics.observe_check_cycle(elapsed.as_secs_f64());
        self.metrics.set_datasets_scanned(stats.datasets as i64);
        self.logger
            .log_cycle(stats.datasets, stats.results, stats.failures, elapsed.as_millis());

        if let Some(health) = &self.health {
            health.set_healthy(components::CHECKER).await;
        }

        stats
    }
}

/// Builder for the periodic checker
pub struct PeriodicCheckerBuilder {
    service: Option<Arc<DetectionService>>,
    config: CheckerConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl PeriodicCheckerBuilder {
    pub fn new() -> Self {
        Self {
            service: None,
            config: CheckerConfig::default(),
            health: None,
            logger: None,
        }
    }

    /// Set the detection service
    pub fn service(mut self, service: Arc<DetectionService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the check interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the checker
    pub fn build(self) -> Result<(PeriodicChecker, mpsc::UnboundedReceiver<DetectionResult>)> {
        let service = self
            .service
            .ok_or_else(|| anyhow::anyhow!("Detection service is required"))?;

        let (mut checker, rx) = PeriodicChecker::new(service, self.config);
        checker.health = self.health;
        if let Some(logger) = self.logger {
            checker.logger = logger;
        }

        Ok((checker, rx))
    }
}

impl Default for PeriodicCheckerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
