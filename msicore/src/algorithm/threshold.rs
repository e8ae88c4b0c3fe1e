use itertools::{Itertools, MinMaxResult};

/// Iteration cap of the two-means split.
pub const MAX_ITERATIONS: usize = 100;

/// Split values into a low and a high cluster by one-dimensional two-means.
///
/// # Arguments
///
/// * `values` - per-pixel values; missing and NaN values never join a cluster
///
/// # Returns
///
/// * `true` for values in the cluster with the higher mean. When all valid values
///   are equal there is nothing to split and every valid value is kept.
///
pub fn two_means_mask(values: &[Option<f64>]) -> Vec<bool> {
    let valid = || values.iter().flatten().copied().filter(|v| !v.is_nan());
    let threshold = match valid().minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => return vec![false; values.len()],
        MinMaxResult::OneElement(_) => f64::NEG_INFINITY,
        MinMaxResult::MinMax(min, max) if min == max => f64::NEG_INFINITY,
        MinMaxResult::MinMax(min, max) => split(valid, min, max),
    };
    values
        .iter()
        .map(|v| matches!(v, Some(v) if !v.is_nan() && *v > threshold))
        .collect()
}

fn split<I: Iterator<Item = f64>>(valid: impl Fn() -> I, mut low: f64, mut high: f64) -> f64 {
    let mut threshold = (low + high) / 2.0;
    for _ in 0..MAX_ITERATIONS {
        let (mut low_sum, mut low_n, mut high_sum, mut high_n) = (0.0, 0usize, 0.0, 0usize);
        for v in valid() {
            if v > threshold {
                high_sum += v;
                high_n += 1;
            } else {
                low_sum += v;
                low_n += 1;
            }
        }
        // min <= threshold < max keeps both clusters populated
        low = low_sum / low_n as f64;
        high = high_sum / high_n as f64;
        let next = (low + high) / 2.0;
        if next == threshold {
            break;
        }
        threshold = next;
    }
    threshold
}
