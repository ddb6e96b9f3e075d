//! On-demand detection through the agent API

use anyhow::Result;
use colored::Colorize;
use outlier_lib::{format_timestamp, DetectionResult};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_level, or_dash, print_json, print_success, print_table, OutputFormat,
};

/// Row for the incidents table
#[derive(Tabled)]
struct IncidentRow {
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
}

fn incident_rows(results: &[DetectionResult]) -> Vec<IncidentRow> {
    results
        .iter()
        .flat_map(|r| r.result.iter())
        .map(|(level, incident)| IncidentRow {
            metric: incident.metric.clone(),
            attribute: or_dash(&incident.attribute),
            level: color_level(level),
            start: format_timestamp(&incident.period_start),
            end: format_timestamp(&incident.period_end),
        })
        .collect()
}

/// Run detection for a site and print its warnings and alarms
pub async fn detect(client: &ApiClient, site_id: &str, format: OutputFormat) -> Result<()> {
    let results = client.detect(site_id).await?;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table => {
            println!("{} {}", "Outlier detection for".bold(), site_id.cyan());
            if let Some(first) = results.first() {
                println!(
                    "Window: {} .. {} (lookback {}, step {})",
                    format_timestamp(&first.date_start),
                    format_timestamp(&first.date_end),
                    first.time_ago,
                    first.time_step
                );
            }
            println!("Metrics checked: {}", results.len());
            println!();

            let rows = incident_rows(&results);
            if rows.is_empty() {
                print_success("No outliers detected");
            } else {
                print_table(&rows);
            }
        }
    }

    Ok(())
}
