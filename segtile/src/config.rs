//! Run configuration.
//!
//! Every unit of work receives the full [`RunConfig`] explicitly; nothing is
//! read from process-wide state. All structs deserialize from YAML or JSON
//! and reject invalid values through `validate()` before any job starts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::StatsRequest;

// ============================================================================
// Tiling
// ============================================================================

/// How the raster extent is cut into overlapping tiles.
///
/// Correctness rule: a segment that crosses a tile boundary must lie
/// entirely inside both tiles' windows, otherwise the two tiles see
/// different shapes and stitching can split it. A segment of diameter `d`
/// that touches a boundary extends at most `d` pixels past it, so
/// `overlap >= max_segment_diameter` is required and checked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Core width of a tile (the columns it owns in the output).
    pub tile_width: usize,
    /// Core height of a tile (the rows it owns in the output).
    pub tile_height: usize,
    /// Margin added to each interior edge of a tile's core.
    pub overlap: usize,
    /// Largest segment diameter (in pixels) the caller expects.
    pub max_segment_diameter: usize,
    /// Optional cap on pixels per tile window; shrinks the core to fit.
    pub max_tile_pixels: Option<usize>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_width: 4096,
            tile_height: 4096,
            overlap: 1024,
            max_segment_diameter: 1024,
            max_tile_pixels: None,
        }
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.overlap == 0 {
            return Err(Error::config("tiling.overlap", "must be at least 1"));
        }
        if self.max_segment_diameter == 0 {
            return Err(Error::config(
                "tiling.max_segment_diameter",
                "must be at least 1",
            ));
        }
        if self.overlap < self.max_segment_diameter {
            return Err(Error::config(
                "tiling.overlap",
                format!(
                    "overlap {} is narrower than the maximum segment diameter {}; \
                     segments crossing tile boundaries would be split",
                    self.overlap, self.max_segment_diameter
                ),
            ));
        }
        let (width, height) = self.effective_tile_size()?;
        if width.min(height) <= self.overlap {
            return Err(Error::config(
                "tiling.tile_width",
                format!(
                    "tile core {width}x{height} must be larger than overlap {}",
                    self.overlap
                ),
            ));
        }
        Ok(())
    }

    /// Core tile (width, height) after applying the pixel budget.
    pub fn effective_tile_size(&self) -> Result<(usize, usize)> {
        let Some(budget) = self.max_tile_pixels else {
            return Ok((self.tile_width, self.tile_height));
        };
        let side = (budget as f64).sqrt().floor() as usize;
        let margin = 2 * self.overlap;
        if side <= margin {
            return Err(Error::config(
                "tiling.max_tile_pixels",
                format!(
                    "budget of {budget} pixels cannot hold a tile with overlap {}",
                    self.overlap
                ),
            ));
        }
        let side = side - margin;
        Ok((self.tile_width.min(side), self.tile_height.min(side)))
    }
}

// ============================================================================
// Segmentation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Number of spectral clusters fitted during prepare.
    pub num_clusters: usize,
    /// Fraction of pixels sampled for cluster fitting, in (0, 1].
    pub subsample_fraction: f64,
    pub max_kmeans_iterations: usize,
    /// Stop k-means when no centre moves further than this.
    pub kmeans_tolerance: f64,
    pub seed: u64,
    /// Merge adjacent regions whose mean spectral distance is at most this.
    pub merge_threshold: Option<f64>,
    /// Stop region merging once this many regions remain.
    pub target_segments: Option<usize>,
    /// Segments smaller than this are merged into their closest neighbour.
    pub min_segment_size: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            num_clusters: 60,
            subsample_fraction: 0.01,
            max_kmeans_iterations: 100,
            kmeans_tolerance: 1e-4,
            seed: 0,
            merge_threshold: None,
            target_segments: None,
            min_segment_size: 50,
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_clusters == 0 {
            return Err(Error::config(
                "segmentation.num_clusters",
                "must be at least 1",
            ));
        }
        if !(self.subsample_fraction > 0.0 && self.subsample_fraction <= 1.0) {
            return Err(Error::config(
                "segmentation.subsample_fraction",
                format!(
                    "{} is outside (0, 1]; more than 100% of pixels cannot be sampled",
                    self.subsample_fraction
                ),
            ));
        }
        if self.max_kmeans_iterations == 0 {
            return Err(Error::config(
                "segmentation.max_kmeans_iterations",
                "must be at least 1",
            ));
        }
        if !(self.kmeans_tolerance >= 0.0) {
            return Err(Error::config(
                "segmentation.kmeans_tolerance",
                "must be non-negative",
            ));
        }
        if let Some(threshold) = self.merge_threshold {
            if !(threshold >= 0.0) {
                return Err(Error::config(
                    "segmentation.merge_threshold",
                    "must be non-negative",
                ));
            }
        }
        if self.target_segments == Some(0) {
            return Err(Error::config(
                "segmentation.target_segments",
                "must be at least 1",
            ));
        }
        if self.min_segment_size == 0 {
            return Err(Error::config(
                "segmentation.min_segment_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Stitching
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Share of a label's overlap-band pixels, in [0, 1), that must be
    /// exceeded by its overlap with a label on the other tile before the two
    /// are linked.
    pub min_shared_fraction: f64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            min_shared_fraction: 0.5,
        }
    }
}

impl StitchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.min_shared_fraction) {
            return Err(Error::config(
                "stitch.min_shared_fraction",
                format!(
                    "{} is outside [0, 1); no label can share more than all of its pixels",
                    self.min_shared_fraction
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Side of the square blocks streamed through the statistics engine.
    pub tile_size: usize,
    /// Number of blocks read concurrently.
    pub read_workers: usize,
    /// Permit moment statistics over floating point sources.
    pub allow_float: bool,
    pub requests: Vec<StatsRequest>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            tile_size: 1024,
            read_workers: 1,
            allow_float: false,
            requests: Vec::new(),
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(Error::config("stats.tile_size", "must be at least 1"));
        }
        if self.read_workers == 0 {
            return Err(Error::config("stats.read_workers", "must be at least 1"));
        }
        for request in &self.requests {
            request.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub tiling: TilingConfig,
    pub segmentation: SegmentationConfig,
    pub stitch: StitchConfig,
    pub stats: StatsConfig,
    /// Rows per attribute-table page.
    pub page_size: u32,
    /// Units executed concurrently by the local executor.
    pub workers: usize,
    /// Keep tile and stitch artifacts after finalize.
    pub retain_intermediates: bool,
    /// Estimate label band statistics from the histogram.
    pub band_stats: bool,
    pub colour_table: bool,
    pub colour_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tiling: TilingConfig::default(),
            segmentation: SegmentationConfig::default(),
            stitch: StitchConfig::default(),
            stats: StatsConfig::default(),
            page_size: 10_000,
            workers: 4,
            retain_intermediates: false,
            band_stats: true,
            colour_table: true,
            colour_seed: 0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        self.tiling.validate()?;
        self.segmentation.validate()?;
        self.stitch.validate()?;
        self.stats.validate()?;
        if self.page_size == 0 {
            return Err(Error::config("page_size", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers", "must be at least 1"));
        }
        Ok(())
    }

    /// Loads a YAML or JSON run configuration and validates it.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = common::serde_format::load_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn test_overlap_narrower_than_segment_diameter_rejected() {
        let tiling = TilingConfig {
            tile_width: 100,
            tile_height: 100,
            overlap: 5,
            max_segment_diameter: 8,
            max_tile_pixels: None,
        };
        let err = tiling.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                field: "tiling.overlap",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_overlap_rejected() {
        let tiling = TilingConfig {
            overlap: 0,
            ..TilingConfig::default()
        };
        assert!(tiling.validate().is_err());
    }

    #[test]
    fn test_pixel_budget_shrinks_tile() {
        let tiling = TilingConfig {
            tile_width: 4096,
            tile_height: 50,
            overlap: 10,
            max_segment_diameter: 10,
            max_tile_pixels: Some(100 * 100),
        };
        assert_eq!(tiling.effective_tile_size().unwrap(), (80, 50));
        tiling.validate().unwrap();
    }

    #[test]
    fn test_pixel_budget_too_small_for_overlap() {
        let tiling = TilingConfig {
            tile_width: 4096,
            tile_height: 4096,
            overlap: 10,
            max_segment_diameter: 10,
            max_tile_pixels: Some(400),
        };
        let err = tiling.validate().unwrap_err();
        assert!(err.to_string().contains("max_tile_pixels"));
    }

    #[test]
    fn test_subsample_above_hundred_percent_rejected() {
        let config = SegmentationConfig {
            subsample_fraction: 1.5,
            ..SegmentationConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("subsample_fraction"));
    }

    #[test]
    fn test_min_shared_fraction_range() {
        let fraction = |min_shared_fraction| StitchConfig {
            min_shared_fraction,
        };
        assert!(fraction(0.0).validate().is_ok());
        assert!(fraction(0.99).validate().is_ok());
        assert!(fraction(1.0).validate().is_err());
        assert!(fraction(-0.1).validate().is_err());
        assert!(fraction(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "tiling:\n  tile_width: 512\n  tile_height: 512\n  overlap: 64\n  max_segment_diameter: 32\nworkers: 2\n";
        let config: RunConfig =
            common::serde_format::deserialize(yaml.as_bytes(), common::SerdeFormat::Yaml)
                .unwrap();
        assert_eq!(config.tiling.tile_width, 512);
        assert_eq!(config.workers, 2);
        assert_eq!(config.page_size, RunConfig::default().page_size);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = common::test_utils::test_output_dir("config_load");
        let path = dir.join("run.json");
        let config = RunConfig {
            workers: 3,
            ..RunConfig::default()
        };
        common::serde_format::save_file(&config, &path).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), config);
    }
}
