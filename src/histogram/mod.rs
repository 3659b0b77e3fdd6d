use std::collections::BTreeMap;

/// Cumulative distribution of node scores.
///
/// Buckets are `(upper_bound, cumulative_count)` pairs in ascending
/// upper-bound order; each count covers every score less than or equal to
/// that bound, so the sequence is monotone non-decreasing and the final
/// count equals `count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreHistogram {
    pub buckets: Vec<(f64, u64)>,
    /// Arithmetic sum of the input scores (full precision, not midpoints).
    pub sum: f64,
    pub count: u64,
}

impl ScoreHistogram {
    /// Builds a cumulative histogram over `scores` with the given bucket
    /// width.
    ///
    /// Each score lands in the bucket whose upper bound is the smallest
    /// multiple of `bucket_width` at or above it; a score exactly on a grid
    /// line belongs to that line. Scores may be negative.
    ///
    /// The result is input-order independent: scores are summed in
    /// ascending order.
    pub fn build(scores: &[f64], bucket_width: f64) -> Self {
        debug_assert!(bucket_width > 0.0, "bucket_width must be positive");

        // Counts keyed by signed grid index, so emission is ascending.
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for &score in scores {
            *counts.entry(bucket_index(score, bucket_width)).or_insert(0) += 1;
        }

        let mut buckets = Vec::with_capacity(counts.len());
        let mut cumulative = 0u64;
        for (idx, n) in counts {
            cumulative += n;
            buckets.push((idx as f64 * bucket_width, cumulative));
        }

        let mut sorted: Vec<f64> = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let sum = sorted.iter().sum();

        Self {
            buckets,
            sum,
            count: cumulative,
        }
    }
}

/// Signed grid index of the smallest bucket-width multiple >= `score`.
fn bucket_index(score: f64, bucket_width: f64) -> i64 {
    (score / bucket_width).ceil() as i64
}
