//! Reporter tests against a real incident log on disk

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{DetectionOutcome, DetectionResult, Incident, IncidentLevel, IncidentLog};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// Sink that keeps every report it receives
#[derive(Default)]
struct CollectingSink {
    reports: Mutex<Vec<IncidentLog>>,
}

impl CollectingSink {
    fn reports(&self) -> Vec<IncidentLog> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for CollectingSink {
    async fn send(&self, report: &IncidentLog) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Sink that always fails
struct FailingSink;

#[async_trait]
impl ReportSink for FailingSink {
    async fn send(&self, _report: &IncidentLog) -> anyhow::Result<()> {
        anyhow::bail!("webhook unreachable")
    }
}

fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, h, m, 0).unwrap()
}

fn incident(metric: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Incident {
    Incident {
        period_start: start,
        period_end: end,
        metric: metric.to_string(),
        attribute: "desktop".to_string(),
    }
}

fn result(site_id: &str, outcome: DetectionOutcome) -> DetectionResult {
    DetectionResult {
        site_id: site_id.to_string(),
        method: "3-sigmas".to_string(),
        check_time_start: at(12, 0, 0),
        check_time_end: at(12, 0, 0),
        time_ago: "24h".to_string(),
        time_step: "1h".to_string(),
        date_start: at(11, 0, 0),
        date_end: at(12, 0, 0),
        result: outcome,
    }
}

fn alarm_at_noon(site_id: &str, metric: &str) -> DetectionResult {
    let mut outcome = DetectionOutcome::default();
    outcome.push(
        IncidentLevel::Alarm,
        incident(metric, at(11, 12, 0), at(11, 13, 0)),
    );
    result(site_id, outcome)
}

fn setup(dir: &TempDir) -> (Arc<IncidentLogStore>, Arc<CollectingSink>, Reporter) {
    let store = Arc::new(IncidentLogStore::new(dir.path().join("reports.json")));
    let sink = Arc::new(CollectingSink::default());
    let reporter = Reporter::new(Arc::clone(&store), sink.clone());
    (store, sink, reporter)
}

#[tokio::test]
async fn test_novel_incidents_are_persisted_and_reported() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);

    let mut outcome = DetectionOutcome::default();
    outcome.push(
        IncidentLevel::Warning,
        incident("visits", at(11, 3, 0), at(11, 4, 0)),
    );
    outcome.push(
        IncidentLevel::Alarm,
        incident("visits", at(11, 12, 0), at(11, 13, 0)),
    );

    let summary = reporter.process(&result("shop-1", outcome)).await;

    assert!(summary.persisted);
    assert_eq!(summary.reported.len(), 2);
    assert_eq!(summary.reported[0].level, IncidentLevel::Alarm);
    assert_eq!(summary.reported[1].level, IncidentLevel::Warning);

    let logs = store.load().await.unwrap();
    assert_eq!(logs, summary.reported);
    assert_eq!(sink.reports(), summary.reported);
}

#[tokio::test]
async fn test_same_result_twice_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);
    let detection = alarm_at_noon("shop-1", "visits");

    let first = reporter.process(&detection).await;
    let second = reporter.process(&detection).await;

    assert_eq!(first.reported.len(), 1);
    assert!(second.reported.is_empty());
    assert!(second.persisted);
    assert_eq!(store.load().await.unwrap().len(), 1);
    assert_eq!(sink.reports().len(), 1);
}

#[tokio::test]
async fn test_sub_hour_jitter_is_not_reported_again() {
    let dir = TempDir::new().unwrap();
    let (store, _sink, reporter) = setup(&dir);

    reporter.process(&alarm_at_noon("shop-1", "visits")).await;

    let mut shifted = DetectionOutcome::default();
    shifted.push(
        IncidentLevel::Warning,
        incident("visits", at(11, 12, 45), at(11, 13, 10)),
    );
    let summary = reporter.process(&result("shop-1", shifted)).await;

    assert!(summary.reported.is_empty());
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_hour_on_another_day_is_novel() {
    let dir = TempDir::new().unwrap();
    let (store, _sink, reporter) = setup(&dir);

    reporter.process(&alarm_at_noon("shop-1", "visits")).await;

    let mut next_day = DetectionOutcome::default();
    next_day.push(
        IncidentLevel::Alarm,
        incident("visits", at(12, 12, 0), at(12, 13, 0)),
    );
    let summary = reporter.process(&result("shop-1", next_day)).await;

    assert_eq!(summary.reported.len(), 1);
    assert_eq!(store.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_entries_of_other_sites_do_not_suppress() {
    let dir = TempDir::new().unwrap();
    let (store, _sink, reporter) = setup(&dir);

    reporter.process(&alarm_at_noon("shop-1", "visits")).await;
    let summary = reporter.process(&alarm_at_noon("shop-2", "visits")).await;

    assert_eq!(summary.reported.len(), 1);
    assert_eq!(summary.reported[0].site_id, "shop-2");
    assert_eq!(store.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicates_within_one_result_collapse() {
    let dir = TempDir::new().unwrap();
    let (store, _sink, reporter) = setup(&dir);

    let mut outcome = DetectionOutcome::default();
    outcome.push(
        IncidentLevel::Alarm,
        incident("visits", at(11, 12, 0), at(11, 13, 0)),
    );
    outcome.push(
        IncidentLevel::Warning,
        incident("visits", at(11, 12, 30), at(11, 13, 0)),
    );

    let summary = reporter.process(&result("shop-1", outcome)).await;

    assert_eq!(summary.reported.len(), 1);
    assert_eq!(summary.reported[0].level, IncidentLevel::Alarm);
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_result_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);

    let summary = reporter
        .process(&result("shop-1", DetectionOutcome::default()))
        .await;

    assert!(summary.reported.is_empty());
    assert!(!store.path().exists());
    assert!(sink.reports().is_empty());
}

#[tokio::test]
async fn test_corrupt_log_still_reports_and_keeps_file() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);
    std::fs::write(store.path(), "not json").unwrap();

    let health = HealthRegistry::for_pipeline().await;
    let reporter = reporter.with_health(health.clone());

    let summary = reporter.process(&alarm_at_noon("shop-1", "visits")).await;

    assert!(!summary.persisted);
    assert_eq!(summary.reported.len(), 1);
    assert_eq!(sink.reports().len(), 1);
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "not json");

    let status = health.health().await.components[components::LOG_STORE].status;
    assert_eq!(status, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_lock_timeout_still_reports() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        IncidentLogStore::new(dir.path().join("reports.json"))
            .with_lock_timeout(Duration::from_millis(20)),
    );
    let sink = Arc::new(CollectingSink::default());
    let reporter = Reporter::new(Arc::clone(&store), sink.clone());

    let held = store.begin().await.unwrap();
    let summary = reporter.process(&alarm_at_noon("shop-1", "visits")).await;
    drop(held);

    assert!(!summary.persisted);
    assert_eq!(sink.reports().len(), 1);
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_timeout_still_skips_known_incidents() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        IncidentLogStore::new(dir.path().join("reports.json"))
            .with_lock_timeout(Duration::from_millis(20)),
    );
    let sink = Arc::new(CollectingSink::default());
    let reporter = Reporter::new(Arc::clone(&store), sink.clone());

    assert!(reporter.process(&alarm_at_noon("shop-1", "visits")).await.persisted);

    let held = store.begin().await.unwrap();
    let known = reporter.process(&alarm_at_noon("shop-1", "visits")).await;
    let novel = reporter.process(&alarm_at_noon("shop-1", "orders")).await;
    drop(held);

    assert!(known.reported.is_empty());
    assert!(!known.persisted);
    assert_eq!(novel.reported.len(), 1);
    assert!(!novel.persisted);
    assert_eq!(sink.reports().len(), 2);
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sink_failure_does_not_undo_persistence() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(IncidentLogStore::new(dir.path().join("reports.json")));
    let reporter = Reporter::new(Arc::clone(&store), Arc::new(FailingSink));

    let summary = reporter.process(&alarm_at_noon("shop-1", "visits")).await;

    assert!(summary.persisted);
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_novel_incidents_all_persist() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);
    let reporter = Arc::new(reporter);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let reporter = Arc::clone(&reporter);
        tasks.push(tokio::spawn(async move {
            reporter
                .process(&alarm_at_noon("shop-1", &format!("metric-{i}")))
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().persisted);
    }

    let logs = store.load().await.unwrap();
    assert_eq!(logs.len(), 16);
    assert_eq!(sink.reports().len(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_drains_channel_before_returning() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);
    let reporter = Arc::new(reporter.with_config(ReporterConfig {
        max_concurrent_reports: 2,
    }));

    let (tx, rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    for metric in ["visits", "orders", "bounces"] {
        tx.send(alarm_at_noon("shop-1", metric)).unwrap();
    }
    drop(tx);

    reporter.run(rx, shutdown_rx).await;

    assert_eq!(store.load().await.unwrap().len(), 3);
    assert_eq!(sink.reports().len(), 3);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let (_store, _sink, reporter) = setup(&dir);
    let health = HealthRegistry::for_pipeline().await;
    let reporter = reporter.with_health(health.clone());

    let (_tx, rx) = mpsc::unbounded_channel::<DetectionResult>();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(Arc::new(reporter).run(rx, shutdown_rx));
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reporter did not stop")
        .unwrap();

    let status = health.health().await.components[components::REPORTER].status;
    assert_eq!(status, ComponentStatus::Unhealthy);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_report() {
    let dir = TempDir::new().unwrap();
    let (store, sink, reporter) = setup(&dir);

    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(Arc::new(reporter).run(rx, shutdown_rx));

    // Keep the log locked so the report stalls mid-transaction
    let held = store.begin().await.unwrap();
    tx.send(alarm_at_noon("shop-1", "visits")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert!(sink.reports().is_empty());

    drop(held);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reporter did not stop")
        .unwrap();

    assert_eq!(store.load().await.unwrap().len(), 1);
    assert_eq!(sink.reports().len(), 1);
}
