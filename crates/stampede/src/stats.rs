//! Statistical primitives
//!
//! Every percentile in the crate goes through [`percentile`], which uses the
//! ceil-index rule: sort ascending, take `ceil(p / 100 * n) - 1`, clamp to
//! `[0, n - 1]`.

use serde::{Deserialize, Serialize};

/// Multiplier applied to the interquartile range when computing outlier fences
pub const IQR_FENCE: f64 = 1.5;

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of an unsorted slice (average of the two middle values for even lengths)
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile of an already sorted slice using the ceil-index rule.
///
/// `p` is expressed on the 0-100 scale. Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[idx]
}

/// Copy and sort ascending (NaN sorts as equal)
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Fixed percentile set reported everywhere in the crate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Compute from an already sorted slice
    pub fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            p50: percentile(sorted, 50.0),
            p75: percentile(sorted, 75.0),
            p90: percentile(sorted, 90.0),
            p95: percentile(sorted, 95.0),
            p99: percentile(sorted, 99.0),
        }
    }
}

/// Descriptive statistics for one series of observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    #[serde(flatten)]
    pub percentiles: Percentiles,
}

impl Summary {
    /// Summarize a series. All fields are 0 when `values` is empty.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let sorted = sorted_copy(values);
        Self {
            mean: mean(&sorted),
            median: median(&sorted),
            stddev: std_dev(&sorted),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentiles: Percentiles::from_sorted(&sorted),
        }
    }
}

/// Lower and upper Tukey fences for a series
pub fn iqr_bounds(values: &[f64]) -> (f64, f64) {
    let sorted = sorted_copy(values);
    let q1 = percentile(&sorted, 25.0);
    let q3 = percentile(&sorted, 75.0);
    let iqr = q3 - q1;
    (q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr)
}

/// Keep only the items whose key lies inside the IQR fences (inclusive)
pub fn remove_outliers<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    if items.is_empty() {
        return items;
    }
    let values: Vec<f64> = items.iter().map(&key).collect();
    let (lower, upper) = iqr_bounds(&values);
    items
        .into_iter()
        .filter(|item| {
            let v = key(item);
            v >= lower && v <= upper
        })
        .collect()
}
