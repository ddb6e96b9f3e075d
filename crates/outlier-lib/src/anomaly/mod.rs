//! Outlier detection over metric time series
//!
//! This module provides:
//! - Step-sized bucketing of a sorted sample
//! - Three-sigma detection with warning and alarm bands
//! - A dataset scanner that runs every configured method over every metric

mod bucketer;
mod scanner;
mod three_sigma;

pub use bucketer::{bucketize, bucketize_by_day, Bucket, BucketPolicy};
pub use scanner::{DatasetScanner, ScanOutcome};
pub use three_sigma::{Limits, ThreeSigmaDetector};

use thiserror::Error;

/// Reasons a single metric's detection run can fail.
///
/// None of these are fatal to a scan: the failing metric is skipped.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("metric series is empty")]
    EmptySeries,

    #[error("no samples left after filtering by window and minimum value")]
    NoQualifyingSamples,

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDurationConfig { value: String, reason: String },

    #[error("cannot align timestamps to step: {0}")]
    TimeRounding(#[from] chrono::RoundingError),
}
