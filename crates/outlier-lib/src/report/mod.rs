//! Deduplicating incident reporting
//!
//! Detection results arrive from the periodic checker. Incidents already
//! present in the incident log are dropped; novel ones are appended to the
//! log and handed to a [`ReportSink`].

mod reporter;
mod sink;
mod store;

#[cfg(test)]
mod tests;

pub use reporter::{Reporter, ReporterConfig, ReportSummary, DEFAULT_MAX_CONCURRENT_REPORTS};
pub use sink::{LogSink, StdoutSink};
pub use store::{
    IncidentLogDocument, IncidentLogStore, LogStoreError, LogTransaction, DEFAULT_LOCK_TIMEOUT,
};

use crate::models::IncidentLog;
use anyhow::Result;

pub use async_trait::async_trait;

/// Destination for notifications about newly reported incidents
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver the notification for one novel incident
    async fn send(&self, report: &IncidentLog) -> Result<()>;
}
