//! Periodic outlier checking
//!
//! Dataset configurations and metric samples come from pluggable sources.
//! [`DetectionService`] runs detection for one site on demand; the
//! [`PeriodicChecker`] runs it for every dataset on a fixed interval and
//! hands the results to the reporter over a channel.

mod r#loop;
mod sources;

#[cfg(test)]
mod tests;

pub use r#loop::{CheckerConfig, CycleStats, PeriodicChecker, PeriodicCheckerBuilder};
pub use sources::{FileConfigSource, SyntheticSampleSource, DEFAULT_SYNTHETIC_HISTORY_DAYS};

use crate::anomaly::{DatasetScanner, ScanOutcome};
use crate::models::{DatasetConfig, DetectionResult, MetricSeries};
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;

pub use async_trait::async_trait;

/// Provides the current dataset configurations
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Vec<DatasetConfig>>;
}

/// Provides metric samples for a dataset
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Series for the dataset's tracked metrics, each sorted by timestamp
    async fn fetch(&self, dataset: &DatasetConfig) -> Result<Vec<MetricSeries>>;
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Runs detection against the configured sources
pub struct DetectionService {
    config_source: Arc<dyn ConfigSource>,
    sample_source: Arc<dyn SampleSource>,
    scanner: DatasetScanner,
}

impl DetectionService {
    pub fn new(config_source: Arc<dyn ConfigSource>, sample_source: Arc<dyn SampleSource>) -> Self {
        Self {
            config_source,
            sample_source,
            scanner: DatasetScanner::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: DatasetScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// All configured datasets
    pub async fn datasets(&self) -> Result<Vec<DatasetConfig>> {
        self.config_source.load().await
    }

    /// Fetch fresh samples for a dataset and scan them
    pub async fn scan_dataset(&self, dataset: &DatasetConfig) -> Result<ScanOutcome> {
        let series = self.sample_source.fetch(dataset).await?;
        Ok(self.scanner.scan(dataset, &series))
    }

    /// Detection results for every tracked metric of one site
    pub async fn detect_site(&self, site_id: &str) -> Result<Vec<DetectionResult>, ServiceError> {
        let dataset = self
            .datasets()
            .await?
            .into_iter()
            .find(|d| d.site_id == site_id)
            .ok_or_else(|| ServiceError::DatasetNotFound(site_id.to_string()))?;

        Ok(self.scan_dataset(&dataset).await?.results)
    }
}
