//! Built-in report sinks

use anyhow::Result;
use async_trait::async_trait;

use super::ReportSink;
use crate::models::IncidentLog;
use crate::observability::StructuredLogger;

/// Emits each report as a structured `incident_reported` log event
#[derive(Clone)]
pub struct LogSink {
    logger: StructuredLogger,
}

impl LogSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl ReportSink for LogSink {
    async fn send(&self, report: &IncidentLog) -> Result<()> {
        self.logger.log_incident(report);
        Ok(())
    }
}

/// Prints the notification text of each report to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

#[async_trait]
impl ReportSink for StdoutSink {
    async fn send(&self, report: &IncidentLog) -> Result<()> {
        println!("{report}\n");
        Ok(())
    }
}
