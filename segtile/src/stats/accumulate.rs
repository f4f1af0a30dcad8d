//! Mergeable per-segment aggregates.
//!
//! Every accumulator here can be built from any partition of a segment's
//! pixels and merged back in any order.

use std::collections::BTreeMap;

/// Count, sum, extremes and variance via Welford updates and Chan's
/// parallel combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for MomentAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl MomentAccumulator {
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    pub fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.m2 / self.count as f64).max(0.0).sqrt())
    }
}

/// Exact value counts for order statistics over integer pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueHistogram {
    counts: BTreeMap<i64, u64>,
    total: u64,
}

impl ValueHistogram {
    #[inline]
    pub fn push(&mut self, value: i64) {
        *self.counts.entry(value).or_default() += 1;
        self.total += 1;
    }

    pub fn merge(&mut self, other: &Self) {
        for (&value, &count) in &other.counts {
            *self.counts.entry(value).or_default() += count;
        }
        self.total += other.total;
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Nearest-rank percentile: the smallest value whose cumulative count
    /// reaches `ceil(p / 100 * total)` (at least rank 1).
    pub fn percentile(&self, p: f64) -> Option<i64> {
        if self.total == 0 {
            return None;
        }
        let rank = ((p / 100.0) * self.total as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (&value, &count) in &self.counts {
            seen += count;
            if seen >= rank {
                return Some(value);
            }
        }
        self.counts.keys().next_back().copied()
    }

    pub fn median(&self) -> Option<i64> {
        self.percentile(50.0)
    }

    /// Most frequent value, ties to the smallest.
    pub fn mode(&self) -> Option<i64> {
        let mut best: Option<(i64, u64)> = None;
        for (&value, &count) in &self.counts {
            match best {
                Some((_, c)) if count <= c => {}
                _ => best = Some((value, count)),
            }
        }
        best.map(|(value, _)| value)
    }
}

/// Pixel-space extent, centroid sums and representative pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialAccumulator {
    count: u64,
    min_col: usize,
    max_col: usize,
    min_row: usize,
    max_row: usize,
    sum_col: f64,
    sum_row: f64,
    /// First pixel in raster scan order as `(row, col)`.
    first: (usize, usize),
}

impl Default for SpatialAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            min_col: usize::MAX,
            max_col: 0,
            min_row: usize::MAX,
            max_row: 0,
            sum_col: 0.0,
            sum_row: 0.0,
            first: (usize::MAX, usize::MAX),
        }
    }
}

impl SpatialAccumulator {
    #[inline]
    pub fn push(&mut self, col: usize, row: usize) {
        self.count += 1;
        self.min_col = self.min_col.min(col);
        self.max_col = self.max_col.max(col);
        self.min_row = self.min_row.min(row);
        self.max_row = self.max_row.max(row);
        self.sum_col += col as f64;
        self.sum_row += row as f64;
        self.first = self.first.min((row, col));
    }

    pub fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.min_col = self.min_col.min(other.min_col);
        self.max_col = self.max_col.max(other.max_col);
        self.min_row = self.min_row.min(other.min_row);
        self.max_row = self.max_row.max(other.max_row);
        self.sum_col += other.sum_col;
        self.sum_row += other.sum_row;
        self.first = self.first.min(other.first);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// `(min_col, max_col, min_row, max_row)`.
    pub fn bounds(&self) -> Option<(usize, usize, usize, usize)> {
        (self.count > 0).then_some((self.min_col, self.max_col, self.min_row, self.max_row))
    }

    /// `(col, row)` of the first pixel in scan order.
    pub fn representative(&self) -> Option<(usize, usize)> {
        (self.count > 0).then_some((self.first.1, self.first.0))
    }

    /// Mean pixel position `(col, row)`.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            (self.sum_col / n, self.sum_row / n)
        })
    }
}
