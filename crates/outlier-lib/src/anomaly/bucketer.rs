//! Partitioning of a sorted sample into step-sized buckets
//!
//! Windows are anchored to the sample's own timestamps: the first sample of
//! a bucket opens a window that closes at `timestamp + step`, rounded to the
//! nearest step boundary. Results therefore depend on where sampling starts,
//! not on wall-clock day boundaries.

use chrono::{DateTime, Duration, DurationRound, RoundingError, Utc};

use crate::models::MetricSample;

/// How samples are grouped into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketPolicy {
    /// Windows relative to the first sample of each bucket
    #[default]
    Relative,
    /// One bucket per UTC calendar day; the step is ignored
    CalendarDay,
}

/// A contiguous run of samples covering one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket<'a> {
    samples: &'a [MetricSample],
    boundary: DateTime<Utc>,
}

impl<'a> Bucket<'a> {
    pub fn samples(&self) -> &'a [MetricSample] {
        self.samples
    }

    /// Exclusive end of the window this bucket covers
    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Split `samples` into step-sized runs. Every sample lands in exactly one
/// bucket and buckets come out in input order.
pub fn bucketize(
    samples: &[MetricSample],
    step: Duration,
) -> Result<Vec<Bucket<'_>>, RoundingError> {
    split_by(samples, |first| (first + step).duration_round(step))
}

/// Split `samples` by UTC calendar day
pub fn bucketize_by_day(samples: &[MetricSample]) -> Result<Vec<Bucket<'_>>, RoundingError> {
    split_by(samples, |first| {
        Ok(first.duration_trunc(Duration::days(1))? + Duration::days(1))
    })
}

fn split_by<F>(samples: &[MetricSample], boundary_of: F) -> Result<Vec<Bucket<'_>>, RoundingError>
where
    F: Fn(DateTime<Utc>) -> Result<DateTime<Utc>, RoundingError>,
{
    let mut buckets = Vec::new();
    let mut start = 0;

    while start < samples.len() {
        let boundary = boundary_of(samples[start].timestamp)?;
        // Always advance, even if the window somehow closes before its first sample
        let len = samples[start..]
            .iter()
            .take_while(|s| s.timestamp < boundary)
            .count()
            .max(1);

        buckets.push(Bucket {
            samples: &samples[start..start + len],
            boundary,
        });
        start += len;
    }

    Ok(buckets)
}
