//! Incident log inspection

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use outlier_lib::duration::parse_duration;
use outlier_lib::report::IncidentLogStore;
use outlier_lib::{parse_timestamp, IncidentLevel, IncidentLog};
use tabled::Tabled;

use crate::output::{
    color_level, or_dash, print_info, print_json, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "Site")]
    site_id: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Attribute")]
    attribute: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Method")]
    method: String,
}

impl From<&IncidentLog> for IncidentRow {
    fn from(log: &IncidentLog) -> Self {
        Self {
            site_id: log.site_id.clone(),
            metric: log.metric.clone(),
            attribute: or_dash(&log.attribute),
            level: color_level(log.level),
            start: log.period_start.clone(),
            end: log.period_end.clone(),
            method: log.method.clone(),
        }
    }
}

/// Entry filters; `None` matches everything
#[derive(Debug, Default)]
pub struct IncidentFilter {
    pub site_id: Option<String>,
    pub level: Option<IncidentLevel>,
    /// Only incidents starting at or after this time
    pub since: Option<DateTime<Utc>>,
}

impl IncidentFilter {
    fn matches(&self, log: &IncidentLog) -> bool {
        if self.site_id.as_deref().is_some_and(|s| s != log.site_id) {
            return false;
        }
        if self.level.is_some_and(|l| l != log.level) {
            return false;
        }
        match self.since {
            Some(since) => parse_timestamp(&log.period_start).is_ok_and(|start| start >= since),
            None => true,
        }
    }
}

/// Resolve a `--since` duration such as `24h` against the current time
pub fn since_from_now(raw: &str) -> Result<DateTime<Utc>> {
    let duration = parse_duration(raw).with_context(|| format!("Invalid --since value {raw:?}"))?;
    Utc::now()
        .checked_sub_signed(duration)
        .with_context(|| format!("--since value {raw:?} is out of range"))
}

fn select(logs: Vec<IncidentLog>, filter: &IncidentFilter) -> Vec<IncidentLog> {
    logs.into_iter().filter(|l| filter.matches(l)).collect()
}

/// List entries of the incident log
pub async fn list_incidents(
    log_path: &Path,
    filter: IncidentFilter,
    format: OutputFormat,
) -> Result<()> {
    let store = IncidentLogStore::new(log_path);
    let logs = store
        .load()
        .await
        .with_context(|| format!("Failed to read incident log {}", log_path.display()))?;
    let total = logs.len();
    let selected = select(logs, &filter);

    match format {
        OutputFormat::Json => print_json(&selected)?,
        OutputFormat::Table => {
            if selected.is_empty() {
                print_warning("No incidents found");
                return Ok(());
            }

            let rows: Vec<IncidentRow> = selected.iter().map(IncidentRow::from).collect();
            print_table(&rows);
            print_info(&format!("{} of {} incidents", selected.len(), total));
        }
    }

    Ok(())
}
