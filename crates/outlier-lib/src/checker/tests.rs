//! Checker and detection service tests with in-memory sources

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{IncidentLevel, MetricSample, OutlierMultipliers};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

fn dataset(site_id: &str) -> DatasetConfig {
    DatasetConfig {
        site_id: site_id.to_string(),
        time_ago: "24h".to_string(),
        time_step: "1h".to_string(),
        methods: vec!["3-sigmas".to_string()],
        metrics: vec!["visits".to_string(), "orders".to_string()],
        min_visitors_per_step: 1,
        multipliers: OutlierMultipliers::default(),
    }
}

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap()
}

/// 900 every ten minutes, 2500 through the noon hour when `spike` is set
fn series(metric: &str, spike: bool) -> MetricSeries {
    let samples = (0..=24 * 6)
        .map(|i| {
            let value = if spike && i / 6 == 12 { 2500.0 } else { 900.0 };
            MetricSample::new(day_start() + ChronoDuration::minutes(i * 10), value)
        })
        .collect();
    MetricSeries::new(metric, "").with_samples(samples)
}

struct StaticConfigSource {
    datasets: Vec<DatasetConfig>,
    loads: AtomicUsize,
}

impl StaticConfigSource {
    fn new(datasets: Vec<DatasetConfig>) -> Self {
        Self {
            datasets,
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<Vec<DatasetConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.datasets.clone())
    }
}

struct BrokenConfigSource;

#[async_trait]
impl ConfigSource for BrokenConfigSource {
    async fn load(&self) -> Result<Vec<DatasetConfig>> {
        anyhow::bail!("config store unreadable")
    }
}

/// Spiky `visits`, flat `orders`; fails for site ids starting with `down`
struct FixtureSampleSource;

#[async_trait]
impl SampleSource for FixtureSampleSource {
    async fn fetch(&self, dataset: &DatasetConfig) -> Result<Vec<MetricSeries>> {
        if dataset.site_id.starts_with("down") {
            anyhow::bail!("metrics backend unavailable");
        }
        Ok(vec![series("visits", true), series("orders", false)])
    }
}

fn service(config: Arc<dyn ConfigSource>) -> Arc<DetectionService> {
    Arc::new(DetectionService::new(config, Arc::new(FixtureSampleSource)))
}

#[tokio::test]
async fn test_detect_site_returns_every_metric() {
    let service = service(Arc::new(StaticConfigSource::new(vec![
        dataset("shop-1"),
        dataset("shop-2"),
    ])));

    let results = service.detect_site("shop-2").await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.site_id == "shop-2"));
    assert_eq!(results[0].result.alarms.len(), 1);
    assert!(results[1].result.is_empty());
}

#[tokio::test]
async fn test_detect_site_unknown_site() {
    let service = service(Arc::new(StaticConfigSource::new(vec![dataset("shop-1")])));

    let err = service.detect_site("shop-9").await.unwrap_err();
    assert!(matches!(err, ServiceError::DatasetNotFound(ref id) if id == "shop-9"));
}

#[tokio::test]
async fn test_detect_site_source_failure() {
    let service = service(Arc::new(BrokenConfigSource));

    let err = service.detect_site("shop-1").await.unwrap_err();
    assert!(matches!(err, ServiceError::Source(_)));

    let down = service_with(vec![dataset("down-1")]);
    assert!(matches!(
        down.detect_site("down-1").await,
        Err(ServiceError::Source(_))
    ));
}

fn service_with(datasets: Vec<DatasetConfig>) -> Arc<DetectionService> {
    service(Arc::new(StaticConfigSource::new(datasets)))
}

#[tokio::test]
async fn test_cycle_emits_only_results_with_incidents() {
    let (checker, mut rx) = PeriodicChecker::new(
        service_with(vec![dataset("shop-1"), dataset("shop-2")]),
        CheckerConfig::default(),
    );

    let stats = checker.run_cycle().await;

    assert_eq!(stats.datasets, 2);
    assert_eq!(stats.results, 2);
    assert_eq!(stats.failures, 0);
    assert!(!stats.skipped);

    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());

    assert_eq!(first.site_id, "shop-1");
    assert_eq!(second.site_id, "shop-2");
    for result in [first, second] {
        let (level, incident) = result.result.iter().next().unwrap();
        assert_eq!(level, IncidentLevel::Alarm);
        assert_eq!(incident.metric, "visits");
    }
}

#[tokio::test]
async fn test_cycle_skipped_when_config_fails() {
    let health = HealthRegistry::for_pipeline().await;
    let (checker, mut rx) =
        PeriodicChecker::new(service(Arc::new(BrokenConfigSource)), CheckerConfig::default());
    let checker = checker.with_health(health.clone());

    let stats = checker.run_cycle().await;

    assert!(stats.skipped);
    assert_eq!(stats.datasets, 0);
    assert!(rx.try_recv().is_err());

    let checker_health = &health.health().await.components[components::CHECKER];
    assert_eq!(checker_health.status, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_failing_dataset_does_not_stop_cycle() {
    let health = HealthRegistry::for_pipeline().await;
    let (checker, mut rx) = PeriodicChecker::new(
        service_with(vec![dataset("down-1"), dataset("shop-1")]),
        CheckerConfig::default(),
    );
    let checker = checker.with_health(health.clone());

    let stats = checker.run_cycle().await;

    assert_eq!(stats.datasets, 2);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.results, 1);
    assert_eq!(rx.try_recv().unwrap().site_id, "shop-1");
    assert_eq!(health.health().await.status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_cycle_survives_closed_channel() {
    let (checker, rx) = PeriodicChecker::new(
        service_with(vec![dataset("shop-1")]),
        CheckerConfig::default(),
    );
    drop(rx);

    let stats = checker.run_cycle().await;
    assert_eq!(stats.results, 0);
    assert_eq!(stats.datasets, 1);
}

#[tokio::test]
async fn test_run_checks_immediately_and_stops_on_shutdown() {
    let config = Arc::new(StaticConfigSource::new(vec![dataset("shop-1")]));
    let (checker, mut rx) = PeriodicCheckerBuilder::new()
        .service(service(config.clone()))
        .interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(checker.run(shutdown_rx));

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no result from the first cycle")
        .unwrap();
    assert_eq!(result.site_id, "shop-1");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("checker did not stop")
        .unwrap();

    assert_eq!(config.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_synthetic_source_end_to_end() {
    let end = Utc.with_ymd_and_hms(2024, 1, 12, 0, 30, 0).unwrap();
    let source = SyntheticSampleSource::seeded(ChronoDuration::days(2), 11);

    let mut config = dataset("demo");
    config.metrics = vec!["visits".to_string()];
    config.min_visitors_per_step = 0;

    let series = source.generate(&config, end);
    let outcome = DatasetScanner::new().scan(&config, &series);

    assert_eq!(outcome.results.len(), 1);
    let alarms = &outcome.results[0].result.alarms;
    assert_eq!(alarms.len(), 2);

    let noon = Utc.with_ymd_and_hms(2024, 1, 11, 12, 0, 0).unwrap();
    let evening = Utc.with_ymd_and_hms(2024, 1, 11, 18, 0, 0).unwrap();
    let hour = ChronoDuration::hours(1);

    assert!(alarms[0].period_start >= noon && alarms[0].period_start < noon + hour);
    assert_eq!(alarms[0].period_end, noon + hour);
    assert!(alarms[1].period_start >= evening && alarms[1].period_start < evening + hour);
    assert_eq!(alarms[1].period_end, evening + hour);
}
