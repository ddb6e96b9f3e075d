//! Dataset and sample sources

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::{ConfigSource, SampleSource};
use crate::models::{DatasetConfig, MetricSample, MetricSeries};

/// Days of history generated by default
pub const DEFAULT_SYNTHETIC_HISTORY_DAYS: i64 = 35;

#[derive(Debug, Deserialize)]
struct DatasetStore {
    #[serde(rename = "Datasets")]
    datasets: Option<Vec<DatasetConfig>>,
}

/// Reads dataset configurations from a JSON file of the form
/// `{"Datasets": [...]}`. The file is re-read on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<Vec<DatasetConfig>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read dataset store {:?}", self.path))?;

        let store: DatasetStore = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to decode dataset store {:?}", self.path))?;

        store
            .datasets
            .with_context(|| format!("Missing 'Datasets' key in {:?}", self.path))
    }
}

/// Generates demo traffic for every tracked metric of a dataset.
///
/// Samples are 1 to 30 minutes apart with values drawn from hour-of-day
/// bands. On the 11th of each month the 12:00 and 18:00 hours carry fixed
/// spikes.
pub struct SyntheticSampleSource {
    history: Duration,
    rng: Mutex<StdRng>,
}

impl SyntheticSampleSource {
    pub fn new(history: Duration) -> Self {
        Self {
            history,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic source for tests
    pub fn seeded(history: Duration, seed: u64) -> Self {
        Self {
            history,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Generate the series of a dataset ending at `end`
    pub fn generate(&self, dataset: &DatasetConfig, end: DateTime<Utc>) -> Vec<MetricSeries> {
        let start = end - self.history;
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        dataset
            .metrics
            .iter()
            .map(|metric| {
                let mut samples = Vec::new();
                let mut ts = start;
                while ts < end {
                    samples.push(MetricSample::new(ts, synthetic_value(&mut *rng, ts)));
                    ts += Duration::minutes(rng.gen_range(1..=30));
                }
                MetricSeries::new(metric.as_str(), "").with_samples(samples)
            })
            .collect()
    }
}

impl Default for SyntheticSampleSource {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_SYNTHETIC_HISTORY_DAYS))
    }
}

#[async_trait]
impl SampleSource for SyntheticSampleSource {
    async fn fetch(&self, dataset: &DatasetConfig) -> Result<Vec<MetricSeries>> {
        let now = Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now);
        Ok(self.generate(dataset, now))
    }
}

/// Value range for a timestamp
fn value_band(ts: DateTime<Utc>) -> (f64, f64) {
    let hour = ts.hour();

    if ts.day() == 11 {
        match hour {
            12 => return (2000.0, 2000.0),
            18 => return (2450.0, 2450.0),
            _ => {}
        }
    }

    match hour {
        0..=6 | 22..=23 => (750.0, 900.0),
        7..=12 | 19..=21 => (900.0, 950.0),
        _ => (950.0, 975.0),
    }
}

fn synthetic_value<R: Rng + ?Sized>(rng: &mut R, ts: DateTime<Utc>) -> f64 {
    let (min, max) = value_band(ts);
    if min < max {
        rng.gen_range(min..max)
    } else {
        min
    }
}
