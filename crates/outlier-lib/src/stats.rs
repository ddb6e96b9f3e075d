//! Sample statistics

/// Mean and sample standard deviation (n - 1 denominator).
///
/// Fewer than two samples yields `(0.0, 0.0)`; callers must not treat that
/// as a usable statistic.
pub fn mean_std_dev(samples: &[f64]) -> (f64, f64) {
    if samples.len() < 2 {
        return (0.0, 0.0);
    }

    let count = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / count;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0);

    (mean, variance.sqrt())
}

/// Arithmetic mean, `None` for an empty sample
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}
