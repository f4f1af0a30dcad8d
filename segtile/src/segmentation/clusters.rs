//! Spectral cluster fitting.
//!
//! Centres are fitted once per run on a strided subsample of the whole
//! raster, so every tile assigns pixels to the same classes and identical
//! pixels always land in the same class regardless of tile.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SegmentationConfig;
use crate::error::{Error, Result};
use crate::raster::{is_nodata, RasterSource};
use crate::tiling::TileGrid;

/// Fitted cluster centres, `len() * bands()` values row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralClusters {
    bands: usize,
    centres: Vec<f64>,
}

impl SpectralClusters {
    pub fn new(bands: usize, centres: Vec<f64>) -> Result<Self> {
        if bands == 0 || centres.is_empty() || centres.len() % bands != 0 {
            return Err(Error::precondition(format!(
                "{} centre values do not form clusters of {bands} bands",
                centres.len()
            )));
        }
        Ok(Self { bands, centres })
    }

    #[inline]
    pub fn bands(&self) -> usize {
        self.bands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.centres.len() / self.bands
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }

    #[inline]
    pub fn centre(&self, index: usize) -> &[f64] {
        &self.centres[index * self.bands..(index + 1) * self.bands]
    }

    /// Index of the closest centre; ties go to the lower index.
    #[inline]
    pub fn nearest(&self, pixel: &[f64]) -> u32 {
        debug_assert_eq!(pixel.len(), self.bands);
        let mut best = 0u32;
        let mut best_dist = f64::INFINITY;
        for (i, centre) in self.centres.chunks_exact(self.bands).enumerate() {
            let dist = squared_distance(pixel, centre);
            if dist < best_dist {
                best_dist = dist;
                best = i as u32;
            }
        }
        best
    }
}

#[inline]
pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn lexicographic(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Samples the raster through the tile grid and fits cluster centres.
pub fn fit_clusters(
    source: &dyn RasterSource,
    grid: &TileGrid,
    config: &SegmentationConfig,
) -> Result<SpectralClusters> {
    config.validate()?;
    let info = source.info();
    let bands = info.bands;
    let step = ((1.0 / config.subsample_fraction).round() as usize).max(1);

    let mut samples = Vec::new();
    let mut pixel = vec![0.0; bands];
    for tile in grid.tiles() {
        let planes = source.read_bands(tile.core)?;
        for ly in 0..tile.core.height {
            let y = tile.core.y + ly;
            for lx in 0..tile.core.width {
                let x = tile.core.x + lx;
                if (y * info.width + x) % step != 0 {
                    continue;
                }
                for (value, plane) in pixel.iter_mut().zip(&planes) {
                    *value = plane[(lx, ly)];
                }
                if pixel.iter().any(|&v| is_nodata(info.nodata, v)) {
                    continue;
                }
                samples.extend_from_slice(&pixel);
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::precondition(
            "no valid pixels found while sampling for cluster fitting",
        ));
    }

    tracing::info!(
        samples = samples.len() / bands,
        step,
        clusters = config.num_clusters,
        "Fitting spectral clusters"
    );
    fit_kmeans(&samples, bands, config)
}

/// k-means with k-means++ seeding from `config.seed`.
///
/// When the samples hold no more distinct values than requested clusters,
/// the distinct values themselves become the centres.
pub fn fit_kmeans(
    samples: &[f64],
    bands: usize,
    config: &SegmentationConfig,
) -> Result<SpectralClusters> {
    if bands == 0 || samples.is_empty() || samples.len() % bands != 0 {
        return Err(Error::precondition(format!(
            "{} sample values do not form pixels of {bands} bands",
            samples.len()
        )));
    }
    let k = config.num_clusters;

    let mut distinct: Vec<&[f64]> = samples.chunks_exact(bands).collect();
    distinct.sort_by(|a, b| lexicographic(a, b));
    distinct.dedup_by(|a, b| lexicographic(a, b).is_eq());
    if distinct.len() <= k {
        return SpectralClusters::new(bands, distinct.concat());
    }

    let n = samples.len() / bands;
    let sample = |i: usize| &samples[i * bands..(i + 1) * bands];
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut centres: Vec<f64> = Vec::with_capacity(k * bands);
    centres.extend_from_slice(sample(rng.random_range(0..n)));
    let mut nearest_d2: Vec<f64> = (0..n)
        .map(|i| squared_distance(sample(i), &centres[..bands]))
        .collect();

    while centres.len() < k * bands {
        let total: f64 = nearest_d2.iter().sum();
        if total <= 0.0 {
            break;
        }
        let mut target = rng.random::<f64>() * total;
        let mut chosen = n - 1;
        for (i, &d2) in nearest_d2.iter().enumerate() {
            if target < d2 {
                chosen = i;
                break;
            }
            target -= d2;
        }
        let start = centres.len();
        centres.extend_from_slice(sample(chosen));
        for (i, d2) in nearest_d2.iter_mut().enumerate() {
            *d2 = d2.min(squared_distance(sample(i), &centres[start..]));
        }
    }

    let mut clusters = SpectralClusters::new(bands, centres)?;
    let k = clusters.len();
    for iteration in 0..config.max_kmeans_iterations {
        let assignments: Vec<u32> = samples
            .par_chunks_exact(bands)
            .map(|s| clusters.nearest(s))
            .collect();

        let mut sums = vec![0.0; k * bands];
        let mut counts = vec![0usize; k];
        for (s, &c) in samples.chunks_exact(bands).zip(&assignments) {
            let c = c as usize;
            counts[c] += 1;
            for (acc, v) in sums[c * bands..(c + 1) * bands].iter_mut().zip(s) {
                *acc += v;
            }
        }

        let mut max_shift: f64 = 0.0;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let updated: Vec<f64> = sums[c * bands..(c + 1) * bands]
                .iter()
                .map(|sum| sum / counts[c] as f64)
                .collect();
            max_shift = max_shift.max(squared_distance(&updated, clusters.centre(c)).sqrt());
            clusters.centres[c * bands..(c + 1) * bands].copy_from_slice(&updated);
        }

        if max_shift <= config.kmeans_tolerance {
            tracing::debug!(iteration, max_shift, "k-means converged");
            break;
        }
    }

    let mut rows: Vec<&[f64]> = clusters.centres.chunks_exact(bands).collect();
    rows.sort_by(|a, b| lexicographic(a, b));
    SpectralClusters::new(bands, rows.concat())
}
