//! Outlier Watch CLI
//!
//! A command-line tool for running on-demand detection against the agent,
//! inspecting the incident log and checking agent health.

mod client;
mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, health, incidents};
use outlier_lib::IncidentLevel;

/// Outlier Watch CLI
#[derive(Parser)]
#[command(name = "olw")]
#[command(author, version, about = "CLI for Outlier Watch", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via OLW_API_URL env var)
    #[arg(long, env = "OLW_API_URL", default_value = "http://localhost:8086")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run outlier detection for a site
    Detect {
        /// Site ID as configured in the dataset store
        site_id: String,
    },

    /// List reported incidents from the incident log
    Incidents {
        /// Filter by site ID
        #[arg(long)]
        site_id: Option<String>,

        /// Filter by level (warning, alarm)
        #[arg(long)]
        level: Option<IncidentLevel>,

        /// Only incidents that started within this duration (e.g. 24h, 7d)
        #[arg(long)]
        since: Option<String>,

        /// Path to the incident log
        #[arg(long, env = "OLW_INCIDENT_LOG", default_value = "stores/reports.json")]
        log: PathBuf,
    },

    /// Show agent component health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect { site_id } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            detect::detect(&client, &site_id, cli.format).await?;
        }
        Commands::Incidents {
            site_id,
            level,
            since,
            log,
        } => {
            let filter = incidents::IncidentFilter {
                site_id,
                level,
                since: since.as_deref().map(incidents::since_from_now).transpose()?,
            };
            incidents::list_incidents(&log, filter, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
