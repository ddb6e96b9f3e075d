//! Core data models for the outlier pipeline
//!
//! JSON field names follow the layout of the dataset and report stores, so
//! existing `config.json` / `reports.json` documents load unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::DetectionError;
use crate::duration::parse_duration;

/// Timestamp layout used by every persisted and transmitted record
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a timestamp in [`DATE_TIME_FORMAT`] as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT).map(|naive| naive.and_utc())
}

/// Render a timestamp in [`DATE_TIME_FORMAT`]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(DATE_TIME_FORMAT).to_string()
}

/// Serde adapter for `DateTime<Utc>` fields stored as `YYYY-MM-DD HH:MM:SS`
pub mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// One observation of a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples for one (metric, attribute) pair, ascending by timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Attribute", alias = "Arrtibute", default)]
    pub attribute: String,
    #[serde(rename = "values", default)]
    pub samples: Vec<MetricSample>,
}

impl MetricSeries {
    pub fn new(metric: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            attribute: attribute.into(),
            samples: Vec::new(),
        }
    }

    pub fn with_samples(mut self, samples: Vec<MetricSample>) -> Self {
        self.samples = samples;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Warning and alarm multipliers applied to the global standard deviation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierMultipliers {
    #[serde(rename = "OutliersMultipler", alias = "OutliersMultiplier")]
    pub warning: f64,
    #[serde(rename = "StrongOutliersMultipler", alias = "StrongOutliersMultiplier")]
    pub alarm: f64,
}

impl Default for OutlierMultipliers {
    fn default() -> Self {
        Self {
            warning: 2.0,
            alarm: 3.0,
        }
    }
}

/// Per-site detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(rename = "siteId")]
    pub site_id: String,
    /// Lookback window, e.g. `24h` or `7d`
    #[serde(rename = "TimeAgo")]
    pub time_ago: String,
    /// Bucket width, e.g. `1h`
    #[serde(rename = "TimeStep")]
    pub time_step: String,
    #[serde(rename = "OutliersDetectionMethod", default)]
    pub methods: Vec<String>,
    #[serde(rename = "MetricesList", alias = "MetricsList", default)]
    pub metrics: Vec<String>,
    #[serde(rename = "MinVisitorsPerTimeStep", default)]
    pub min_visitors_per_step: u32,
    #[serde(rename = "OutliersDetection", default)]
    pub multipliers: OutlierMultipliers,
}

impl DatasetConfig {
    /// Parse the lookback and step durations
    pub fn durations(&self) -> Result<(Duration, Duration), DetectionError> {
        let lookback = parse_duration(&self.time_ago)?;
        let step = parse_duration(&self.time_step)?;
        Ok((lookback, step))
    }

    /// Minimum value a sample needs to take part in detection.
    ///
    /// Scales the per-step visitor floor by the number of steps in the
    /// lookback window, so low-traffic samples are discarded.
    pub fn min_detection_value(&self, lookback: Duration, step: Duration) -> f64 {
        let steps = lookback.num_seconds() as f64 / step.num_seconds() as f64;
        steps * f64::from(self.min_visitors_per_step)
    }

    /// Whether this dataset tracks the given metric. An empty list tracks all.
    pub fn tracks(&self, metric: &str) -> bool {
        self.metrics.is_empty() || self.metrics.iter().any(|m| m == metric)
    }
}

/// Supported detection methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMethod {
    ThreeSigmas,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ThreeSigmas => "3-sigmas",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3-sigmas" | "3-sigma" => Ok(DetectionMethod::ThreeSigmas),
            other => Err(format!("unsupported detection method: {}", other)),
        }
    }
}

/// Severity tier of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentLevel {
    Warning,
    Alarm,
}

impl IncidentLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentLevel::Warning => "warning",
            IncidentLevel::Alarm => "alarm",
        }
    }
}

impl fmt::Display for IncidentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warning" => Ok(IncidentLevel::Warning),
            "alarm" => Ok(IncidentLevel::Alarm),
            other => Err(format!("unknown incident level: {}", other)),
        }
    }
}

/// A contiguous abnormal window for one metric/attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    #[serde(rename = "OutlierPeriodStart", with = "timestamp_format")]
    pub period_start: DateTime<Utc>,
    #[serde(rename = "OutlierPeriodEnd", with = "timestamp_format")]
    pub period_end: DateTime<Utc>,
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Attribute")]
    pub attribute: String,
}

impl Incident {
    /// Date-coarse equality: same metric and attribute, and both window
    /// ends agree on calendar day and hour.
    pub fn matches(&self, other: &Incident) -> bool {
        self.metric == other.metric
            && self.attribute == other.attribute
            && same_hour(self.period_start, other.period_start)
            && same_hour(self.period_end, other.period_end)
    }

    /// Date-coarse equality against a persisted entry. Entries whose
    /// window cannot be parsed never match.
    pub fn matches_log(&self, log: &IncidentLog) -> bool {
        if self.metric != log.metric || self.attribute != log.attribute {
            return false;
        }
        match (
            parse_timestamp(&log.period_start),
            parse_timestamp(&log.period_end),
        ) {
            (Ok(start), Ok(end)) => {
                same_hour(self.period_start, start) && same_hour(self.period_end, end)
            }
            _ => false,
        }
    }
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive() && a.hour() == b.hour()
}

/// Warnings and alarms found by one detection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    #[serde(rename = "Warnings", default)]
    pub warnings: Vec<Incident>,
    #[serde(rename = "Alarms", default)]
    pub alarms: Vec<Incident>,
}

impl DetectionOutcome {
    pub fn push(&mut self, level: IncidentLevel, incident: Incident) {
        match level {
            IncidentLevel::Warning => self.warnings.push(incident),
            IncidentLevel::Alarm => self.alarms.push(incident),
        }
    }

    pub fn len(&self) -> usize {
        self.warnings.len() + self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.alarms.is_empty()
    }

    /// All incidents tagged with their level, alarms first
    pub fn iter(&self) -> impl Iterator<Item = (IncidentLevel, &Incident)> {
        self.alarms
            .iter()
            .map(|i| (IncidentLevel::Alarm, i))
            .chain(self.warnings.iter().map(|i| (IncidentLevel::Warning, i)))
    }
}

/// Output of one detector run over one metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "siteId")]
    pub site_id: String,
    #[serde(rename = "OutliersDetectionMethod")]
    pub method: String,
    #[serde(rename = "checkTimeStart", with = "timestamp_format")]
    pub check_time_start: DateTime<Utc>,
    #[serde(rename = "checkTimeEnd", with = "timestamp_format")]
    pub check_time_end: DateTime<Utc>,
    #[serde(rename = "TimeAgo")]
    pub time_ago: String,
    #[serde(rename = "TimeStep")]
    pub time_step: String,
    #[serde(rename = "DateStart", with = "timestamp_format")]
    pub date_start: DateTime<Utc>,
    #[serde(rename = "DateEnd", with = "timestamp_format")]
    pub date_end: DateTime<Utc>,
    #[serde(rename = "Result")]
    pub result: DetectionOutcome,
}

/// Persisted record of a reported incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentLog {
    #[serde(rename = "siteId")]
    pub site_id: String,
    #[serde(rename = "OutliersDetectionMethod")]
    pub method: String,
    #[serde(rename = "TimeAgo")]
    pub time_ago: String,
    #[serde(rename = "TimeStep")]
    pub time_step: String,
    #[serde(rename = "OutlierPeriodStart")]
    pub period_start: String,
    #[serde(rename = "OutlierPeriodEnd")]
    pub period_end: String,
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Attribute")]
    pub attribute: String,
    #[serde(rename = "Level")]
    pub level: IncidentLevel,
}

impl IncidentLog {
    pub fn new(result: &DetectionResult, incident: &Incident, level: IncidentLevel) -> Self {
        Self {
            site_id: result.site_id.clone(),
            method: result.method.clone(),
            time_ago: result.time_ago.clone(),
            time_step: result.time_step.clone(),
            period_start: format_timestamp(&incident.period_start),
            period_end: format_timestamp(&incident.period_end),
            metric: incident.metric.clone(),
            attribute: incident.attribute.clone(),
            level,
        }
    }

    /// Whether this entry belongs to the given site and method
    pub fn belongs_to(&self, site_id: &str, method: &str) -> bool {
        self.site_id == site_id && self.method == method
    }
}

/// Notification text for a newly reported incident
impl fmt::Display for IncidentLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Outliers detection result")?;
        writeln!(f, "Start date: {};", self.period_start)?;
        writeln!(f, "End date: {};", self.period_end)?;
        writeln!(f, "Site ID: {};", self.site_id)?;
        writeln!(f, "Time ago: {};", self.time_ago)?;
        writeln!(f, "Time step: {};", self.time_step)?;
        writeln!(f, "Metric: {};", self.metric)?;
        writeln!(f, "Attribute: {};", self.attribute)?;
        writeln!(f, "Level: {};", self.level)?;
        write!(f, "Method: {};", self.method)
    }
}
