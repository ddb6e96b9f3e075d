//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where novel incident reports are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSinkKind {
    /// Structured `incident_reported` log events
    Log,
    /// Plain notification text on stdout
    Stdout,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for detection, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Dataset configuration store
    #[serde(default = "default_datasets_path")]
    pub datasets_path: PathBuf,

    /// Incident log file
    #[serde(default = "default_incident_log_path")]
    pub incident_log_path: PathBuf,

    /// Check cycle interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Maximum wait for the incident log lock in milliseconds
    #[serde(default = "default_log_lock_timeout")]
    pub log_lock_timeout_ms: u64,

    /// Detection results reported concurrently
    #[serde(default = "default_max_concurrent_reports")]
    pub max_concurrent_reports: usize,

    #[serde(default = "default_report_sink")]
    pub report_sink: ReportSinkKind,

    /// Days of synthetic history generated per dataset
    #[serde(default = "default_synthetic_history_days")]
    pub synthetic_history_days: i64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "outlier-agent".to_string())
}

fn default_api_port() -> u16 {
    8086
}

fn default_datasets_path() -> PathBuf {
    PathBuf::from("stores/config.json")
}

fn default_incident_log_path() -> PathBuf {
    PathBuf::from("stores/reports.json")
}

fn default_check_interval() -> u64 {
    300
}

fn default_log_lock_timeout() -> u64 {
    5000
}

fn default_max_concurrent_reports() -> usize {
    8
}

fn default_report_sink() -> ReportSinkKind {
    ReportSinkKind::Log
}

fn default_synthetic_history_days() -> i64 {
    35
}

impl AgentConfig {
    /// Load configuration from the optional config file and `OUTLIER_*`
    /// environment variables. The file is `$OUTLIER_CONFIG` if set,
    /// otherwise `outlier-agent.{toml,json,yaml}` in the working directory.
    pub fn load() -> Result<Self> {
        let file = std::env::var_os("OUTLIER_CONFIG").map(PathBuf::from);
        Self::from_sources(file.as_deref())
    }

    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("outlier-agent").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("OUTLIER")
                    .try_parsing(true)
                    .ignore_empty(true),
            )
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn log_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.log_lock_timeout_ms)
    }

    pub fn synthetic_history(&self) -> chrono::Duration {
        chrono::Duration::days(self.synthetic_history_days.max(1))
    }
}
