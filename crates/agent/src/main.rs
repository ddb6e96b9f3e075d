//! Outlier Agent - periodic outlier detection daemon
//!
//! Checks every configured dataset on a fixed interval, reports novel
//! incidents once, and serves on-demand detection over HTTP.

use anyhow::Result;
use outlier_lib::{
    checker::{DetectionService, FileConfigSource, PeriodicCheckerBuilder, SyntheticSampleSource},
    health::HealthRegistry,
    observability::{PipelineMetrics, StructuredLogger},
    report::{IncidentLogStore, LogSink, ReportSink, Reporter, ReporterConfig, StdoutSink},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentConfig, ReportSinkKind};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting outlier-agent");

    // Load configuration
    let config = AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        datasets_path = %config.datasets_path.display(),
        incident_log_path = %config.incident_log_path.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::for_pipeline().await;
    let metrics = PipelineMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(AGENT_VERSION);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Detection pipeline: checker -> channel -> reporter
    let service = Arc::new(DetectionService::new(
        Arc::new(FileConfigSource::new(&config.datasets_path)),
        Arc::new(SyntheticSampleSource::new(config.synthetic_history())),
    ));

    let (checker, results_rx) = PeriodicCheckerBuilder::new()
        .service(Arc::clone(&service))
        .interval(config.check_interval())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let store = Arc::new(
        IncidentLogStore::new(&config.incident_log_path)
            .with_lock_timeout(config.log_lock_timeout()),
    );
    let sink: Arc<dyn ReportSink> = match config.report_sink {
        ReportSinkKind::Log => Arc::new(LogSink::new(logger.clone())),
        ReportSinkKind::Stdout => Arc::new(StdoutSink),
    };
    let reporter = Arc::new(
        Reporter::new(store, sink)
            .with_config(ReporterConfig {
                max_concurrent_reports: config.max_concurrent_reports,
            })
            .with_health(health_registry.clone()),
    );

    let checker_handle = tokio::spawn(checker.run(shutdown_tx.subscribe()));
    let reporter_handle = tokio::spawn(reporter.run(results_rx, shutdown_tx.subscribe()));

    // Start detection, health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        service,
    ));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = checker_handle.await {
        error!(error = %e, "Checker task failed");
    }
    // The reporter finishes in-flight log updates before returning
    if let Err(e) = reporter_handle.await {
        error!(error = %e, "Reporter task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
