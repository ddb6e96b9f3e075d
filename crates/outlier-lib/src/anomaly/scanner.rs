//! Runs every configured detection method over every tracked metric of a dataset

use tracing::{debug, warn};

use super::ThreeSigmaDetector;
use crate::models::{DatasetConfig, DetectionMethod, DetectionResult, MetricSeries};

/// Results of scanning one dataset
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Successful detection runs, in method then metric order
    pub results: Vec<DetectionResult>,
    /// Number of metric runs that failed and were skipped
    pub failures: usize,
}

/// Scans datasets metric by metric. Failures never abort the scan.
#[derive(Debug, Clone, Default)]
pub struct DatasetScanner {
    three_sigma: ThreeSigmaDetector,
}

impl DatasetScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_three_sigma(mut self, detector: ThreeSigmaDetector) -> Self {
        self.three_sigma = detector;
        self
    }

    pub fn scan(&self, dataset: &DatasetConfig, series: &[MetricSeries]) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for raw_method in &dataset.methods {
            let method = match raw_method.parse::<DetectionMethod>() {
                Ok(method) => method,
                Err(_) => {
                    warn!(
                        site_id = %dataset.site_id,
                        method = %raw_method,
                        "Unsupported outlier detection method"
                    );
                    continue;
                }
            };

            for metric_series in series.iter().filter(|s| dataset.tracks(&s.metric)) {
                let detected = match method {
                    DetectionMethod::ThreeSigmas => self.three_sigma.detect(dataset, metric_series),
                };

                match detected {
                    Ok(result) => outcome.results.push(result),
                    Err(e) => {
                        outcome.failures += 1;
                        debug!(
                            site_id = %dataset.site_id,
                            method = %method,
                            metric = %metric_series.metric,
                            attribute = %metric_series.attribute,
                            error = %e,
                            "Skipping metric"
                        );
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSample, OutlierMultipliers};
    use chrono::{Duration, TimeZone, Utc};

    fn dataset(methods: &[&str]) -> DatasetConfig {
        DatasetConfig {
            site_id: "shop-1".to_string(),
            time_ago: "24h".to_string(),
            time_step: "1h".to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            metrics: vec!["visits".to_string(), "orders".to_string()],
            min_visitors_per_step: 1,
            multipliers: OutlierMultipliers::default(),
        }
    }

    fn series(metric: &str) -> MetricSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
        let samples = (0..=24 * 6)
            .map(|i| {
                let value = if i / 6 == 12 { 2500.0 } else { 900.0 };
                MetricSample::new(start + Duration::minutes(i * 10), value)
            })
            .collect();
        MetricSeries::new(metric, "").with_samples(samples)
    }

    #[test]
    fn test_scan_all_tracked_metrics() {
        let scanner = DatasetScanner::new();
        let outcome = scanner.scan(&dataset(&["3-sigmas"]), &[series("visits"), series("orders")]);

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures, 0);
        assert!(outcome.results.iter().all(|r| r.result.alarms.len() == 1));
    }

    #[test]
    fn test_untracked_metrics_are_ignored() {
        let scanner = DatasetScanner::new();
        let outcome = scanner.scan(&dataset(&["3-sigmas"]), &[series("bounces")]);

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failures, 0);
    }

    #[test]
    fn test_unknown_method_is_skipped() {
        let scanner = DatasetScanner::new();
        let outcome = scanner.scan(
            &dataset(&["isolation-forest", "3-sigmas"]),
            &[series("visits")],
        );

        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn test_failing_metric_does_not_abort_scan() {
        let scanner = DatasetScanner::new();
        let empty = MetricSeries::new("orders", "");
        let outcome = scanner.scan(&dataset(&["3-sigmas"]), &[empty, series("visits")]);

        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].result.alarms[0].metric, "visits");
    }
}
