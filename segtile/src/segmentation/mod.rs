//! Per-tile segmentation.
//!
//! A tile's pixels are classified against the run-wide spectral clusters,
//! clumped into connected regions of one class, merged by spectral
//! similarity and cleaned of regions below the minimum size. Regions that
//! reach a cut side of the window are only partly visible, so they are
//! neither merged nor eliminated here. The result depends only on the
//! tile's pixels, its cut sides, the clusters and the configuration.

pub mod clusters;
mod clump;
mod merge;

#[cfg(test)]
mod tests;

use common::Buffer2;
use rayon::prelude::*;

use crate::config::SegmentationConfig;
use crate::error::{Error, Result};
use crate::raster::is_nodata;
use crate::tiling::CutEdges;

pub use clusters::{fit_clusters, fit_kmeans, SpectralClusters};
use clump::{clump, NO_CLASS};
use merge::RegionGraph;

/// Local label grid of one tile window. `0` marks nodata.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSegmentation {
    pub labels: Buffer2<u32>,
    pub num_segments: u32,
}

/// Segments one tile window.
///
/// `bands` holds one plane per source band, all of the window's size.
/// A pixel is nodata when any of its band values matches `nodata`.
pub fn segment_tile(
    bands: &[Buffer2<f64>],
    nodata: Option<f64>,
    clusters: &SpectralClusters,
    config: &SegmentationConfig,
    cut: CutEdges,
) -> Result<TileSegmentation> {
    let Some(first) = bands.first() else {
        return Err(Error::precondition("tile has no bands"));
    };
    if bands.len() != clusters.bands() {
        return Err(Error::precondition(format!(
            "tile has {} bands, clusters were fitted on {}",
            bands.len(),
            clusters.bands()
        )));
    }
    let (width, height) = (first.width(), first.height());
    if bands.iter().any(|b| b.width() != width || b.height() != height) {
        return Err(Error::precondition("tile band planes differ in size"));
    }

    let classes = classify(bands, nodata, clusters);
    let (mut labels, clumps) = clump(&classes);

    let mut graph = RegionGraph::build(&labels, clumps, bands, cut);
    graph.merge_similar(config.merge_threshold, config.target_segments);
    graph.eliminate_small(config.min_segment_size);
    let num_segments = graph.relabel(&mut labels);

    tracing::debug!(width, height, clumps, num_segments, "Segmented tile");

    Ok(TileSegmentation {
        labels,
        num_segments,
    })
}

/// Nearest-centre class per pixel, shifted by one so that `0` is nodata.
fn classify(
    bands: &[Buffer2<f64>],
    nodata: Option<f64>,
    clusters: &SpectralClusters,
) -> Buffer2<u32> {
    let width = bands[0].width();
    let height = bands[0].height();
    let mut classes = Buffer2::new_filled(width, height, NO_CLASS);
    if width == 0 {
        return classes;
    }

    classes
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let mut pixel = vec![0.0; bands.len()];
            for (x, class) in row.iter_mut().enumerate() {
                for (value, band) in pixel.iter_mut().zip(bands) {
                    *value = band[(x, y)];
                }
                if pixel.iter().any(|&v| is_nodata(nodata, v)) {
                    continue;
                }
                *class = clusters.nearest(&pixel) + 1;
            }
        });
    classes
}
