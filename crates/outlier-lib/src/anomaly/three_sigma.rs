//! Three-sigma outlier detection
//!
//! The lookback window is split into step-sized buckets. Each bucket gets its
//! own mean and standard deviation; the global baseline is the mean of the
//! bucket means and the mean of the bucket standard deviations. A sample
//! above `mean + std_dev * warning` opens an incident, which is widened to
//! the neighbouring samples that stay at or above the bucket's own
//! `mean + std_dev`. The incident is an alarm when the mean of its samples
//! exceeds `mean + std_dev * alarm`.

use chrono::{DurationRound, Utc};
use tracing::debug;

use super::bucketer::{bucketize, bucketize_by_day, Bucket, BucketPolicy};
use super::DetectionError;
use crate::models::{
    DatasetConfig, DetectionMethod, DetectionOutcome, DetectionResult, Incident, IncidentLevel,
    MetricSample, MetricSeries, OutlierMultipliers,
};
use crate::stats::{mean, mean_std_dev};

/// Buckets with fewer samples have no usable statistics
const MIN_BUCKET_SAMPLES: usize = 2;

/// Statistics of one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
struct BucketStats {
    mean: f64,
    std_dev: f64,
}

impl BucketStats {
    /// Samples at or above this value extend an incident
    fn local_threshold(&self) -> f64 {
        self.mean + self.std_dev
    }
}

/// Global baseline and the warning/alarm limits derived from it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub mean: f64,
    pub std_dev: f64,
    pub warning: f64,
    pub alarm: f64,
}

impl Limits {
    fn from_buckets(stats: &[BucketStats], multipliers: &OutlierMultipliers) -> Self {
        let means: Vec<f64> = stats.iter().map(|s| s.mean).collect();
        let std_devs: Vec<f64> = stats.iter().map(|s| s.std_dev).collect();
        let mean = mean_of(&means);
        let std_dev = mean_of(&std_devs);

        Self {
            mean,
            std_dev,
            warning: mean + std_dev * multipliers.warning,
            alarm: mean + std_dev * multipliers.alarm,
        }
    }
}

fn mean_of(values: &[f64]) -> f64 {
    mean(values).unwrap_or_default()
}

/// Detects outliers with the three-sigma rule
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreeSigmaDetector {
    policy: BucketPolicy,
}

impl ThreeSigmaDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different bucketing policy
    pub fn with_policy(mut self, policy: BucketPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn method(&self) -> DetectionMethod {
        DetectionMethod::ThreeSigmas
    }

    /// Run detection for one metric series of a dataset.
    ///
    /// The series must be sorted ascending by timestamp.
    pub fn detect(
        &self,
        config: &DatasetConfig,
        series: &MetricSeries,
    ) -> Result<DetectionResult, DetectionError> {
        let check_time_start = Utc::now();

        let last = series.samples.last().ok_or(DetectionError::EmptySeries)?;
        let (lookback, step) = config.durations()?;

        let date_end = last.timestamp.duration_trunc(step)?;
        let date_start = date_end
            .checked_sub_signed(lookback)
            .ok_or_else(|| DetectionError::InvalidDurationConfig {
                value: config.time_ago.clone(),
                reason: "out of range".to_string(),
            })?
            .duration_round(step)?;
        let min_value = config.min_detection_value(lookback, step);

        let samples: Vec<MetricSample> = series
            .samples
            .iter()
            .filter(|s| {
                s.value >= min_value && s.timestamp >= date_start && s.timestamp <= date_end
            })
            .copied()
            .collect();

        let buckets = match self.policy {
            BucketPolicy::Relative => bucketize(&samples, step)?,
            BucketPolicy::CalendarDay => bucketize_by_day(&samples)?,
        };

        let measured: Vec<(Bucket<'_>, BucketStats)> = buckets
            .into_iter()
            .filter(|b| b.len() >= MIN_BUCKET_SAMPLES)
            .map(|b| {
                let (mean, std_dev) = mean_std_dev(&b.values());
                (b, BucketStats { mean, std_dev })
            })
            .collect();

        if measured.is_empty() {
            return Err(DetectionError::NoQualifyingSamples);
        }

        let stats: Vec<BucketStats> = measured.iter().map(|(_, s)| *s).collect();
        let limits = Limits::from_buckets(&stats, &config.multipliers);

        debug!(
            site_id = %config.site_id,
            metric = %series.metric,
            buckets = measured.len(),
            mean = limits.mean,
            std_dev = limits.std_dev,
            warning_limit = limits.warning,
            alarm_limit = limits.alarm,
            "Computed detection limits"
        );

        let mut outcome = DetectionOutcome::default();
        for (bucket, bucket_stats) in &measured {
            if bucket_stats.mean < limits.mean {
                continue;
            }
            scan_bucket(bucket, bucket_stats, &limits, series, &mut outcome);
        }

        Ok(DetectionResult {
            site_id: config.site_id.clone(),
            method: self.method().to_string(),
            check_time_start,
            check_time_end: Utc::now(),
            time_ago: config.time_ago.clone(),
            time_step: config.time_step.clone(),
            date_start,
            date_end,
            result: outcome,
        })
    }
}

/// Find non-overlapping incidents inside one bucket
fn scan_bucket(
    bucket: &Bucket<'_>,
    stats: &BucketStats,
    limits: &Limits,
    series: &MetricSeries,
    outcome: &mut DetectionOutcome,
) {
    let samples = bucket.samples();
    let local = stats.local_threshold();

    // Incidents never reach back past the end of the previous one
    let mut floor = 0;
    let mut cursor = 0;

    while cursor < samples.len() {
        if samples[cursor].value <= limits.warning {
            cursor += 1;
            continue;
        }

        let mut first = cursor;
        while first > floor && samples[first - 1].value >= local {
            first -= 1;
        }

        let mut stop = cursor + 1;
        while stop < samples.len() && samples[stop].value >= local {
            stop += 1;
        }

        let window: Vec<f64> = samples[first..stop].iter().map(|s| s.value).collect();
        let level = match mean(&window) {
            Some(m) if m > limits.alarm => IncidentLevel::Alarm,
            _ => IncidentLevel::Warning,
        };

        let period_end = samples
            .get(stop)
            .map(|s| s.timestamp)
            .unwrap_or_else(|| bucket.boundary());

        outcome.push(
            level,
            Incident {
                period_start: samples[first].timestamp,
                period_end,
                metric: series.metric.clone(),
                attribute: series.attribute.clone(),
            },
        );

        floor = stop;
        cursor = stop;
    }
}
