//! Outlier detection library for site traffic metrics
//!
//! This crate provides the core functionality for:
//! - Three-sigma outlier detection over step-sized buckets
//! - Periodic checking of configured datasets
//! - Deduplicated incident reporting backed by a JSON incident log
//! - Health checks and observability

pub mod anomaly;
pub mod checker;
pub mod duration;
pub mod health;
pub mod models;
pub mod observability;
pub mod report;
pub mod stats;

pub use anomaly::DetectionError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
