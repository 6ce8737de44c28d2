//! Weighted empirical summaries of height samples.
//!
//! A summary carries the total weight, the weighted mean, a 95% weighted
//! credible interval, and a 16-bucket histogram of the central 99.9% of the
//! sample values (0.05% trimmed from each tail by value, for display only).
//! Bucket densities are normalized to sum to 1.

use serde::{Deserialize, Serialize};

pub const NUM_BUCKETS: usize = 16;

/// Fraction of samples (by value order) trimmed from each tail before
/// bucketing.
const TAIL_TRIM: f64 = 0.0005;

const CREDIBLE_MASS: f64 = 0.95;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub start: f64,
    pub end: f64,
    pub density: f64,
}

/// Summary of a weighted scalar sample set.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct HeightSummary {
    pub total_weight: f64,
    pub mean: f64,
    /// Lower bound of the 95% weighted credible interval.
    pub lower: f64,
    /// Upper bound of the 95% weighted credible interval.
    pub upper: f64,
    pub buckets: Vec<HistogramBucket>,
}

/// Summarizes `(value, weight)` samples. An empty sample set yields the
/// default (empty) summary.
pub fn summarize(samples: &[(f64, f64)]) -> HeightSummary {
    if samples.is_empty() {
        return HeightSummary::default();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total_weight: f64 = sorted.iter().map(|&(_, w)| w).sum();
    let mean = sorted.iter().map(|&(x, w)| x * w).sum::<f64>() / total_weight;

    let tail = (1.0 - CREDIBLE_MASS) / 2.0;
    let lower = weighted_percentile(&sorted, total_weight, tail);
    let upper = weighted_percentile(&sorted, total_weight, 1.0 - tail);

    HeightSummary { total_weight, mean, lower, upper, buckets: bucketize(&sorted) }
}

/// Walks the sorted samples accumulating weight and returns the first value
/// at or past `fraction` of the total weight, clamped to the last sample.
fn weighted_percentile(sorted: &[(f64, f64)], total_weight: f64, fraction: f64) -> f64 {
    let target = fraction * total_weight;
    let mut cumulative = 0.0;
    for &(x, w) in sorted {
        cumulative += w;
        if cumulative >= target {
            return x;
        }
    }
    sorted[sorted.len() - 1].0
}

fn bucketize(sorted: &[(f64, f64)]) -> Vec<HistogramBucket> {
    // exclude the 0.05% lowest and highest values; trimming is by value
    // order only, ignoring weights
    let lower_idx = (sorted.len() as f64 * TAIL_TRIM).floor() as usize;
    let upper_idx = (sorted.len() as f64 * (1.0 - TAIL_TRIM)).ceil() as usize - 1;

    let min = sorted[lower_idx].0;
    let max = sorted[upper_idx].0;

    if min == max {
        // all retained values identical: a single bucket carries everything
        return vec![HistogramBucket { start: min, end: max, density: 1.0 }];
    }

    let bucket_width = (max - min) / NUM_BUCKETS as f64;
    let mut weights = [0.0f64; NUM_BUCKETS];
    let mut bucketed_weight = 0.0;

    for &(x, w) in &sorted[lower_idx..=upper_idx] {
        if x < min || x > max {
            continue;
        }
        let mut idx = ((x - min) / bucket_width).floor() as usize;
        if idx >= NUM_BUCKETS {
            idx = NUM_BUCKETS - 1; // x == max
        }
        weights[idx] += w;
        bucketed_weight += w;
    }

    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let start = min + i as f64 * bucket_width;
            let end = if i == NUM_BUCKETS - 1 { max } else { start + bucket_width };
            let density = if bucketed_weight > 0.0 { w / bucketed_weight } else { 0.0 };
            HistogramBucket { start, end, density }
        })
        .collect()
}
