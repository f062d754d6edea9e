//! Small statistics helpers for the aggregation engine.

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. Returns 0.0 for an empty slice.
pub fn std_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Whether `value` lies inside `mean ± n * stdev` (inclusive).
pub fn within_n_std_deviations(value: f64, mean: f64, stdev: f64, n: f64) -> bool {
    value >= mean - n * stdev && value <= mean + n * stdev
}

/// Whether `a` lies within `percentage` percent of `b` (inclusive).
///
/// Percentages outside [0, 100] are rejected rather than silently clamped.
pub fn within_percentage_of(a: f64, b: f64, percentage: f64) -> bool {
    if !(0.0..=100.0).contains(&percentage) {
        tracing::error!(percentage, "percentage must be between 0 and 100");
        return false;
    }
    a <= (1.0 + percentage / 100.0) * b && a >= (1.0 - percentage / 100.0) * b
}
