//! Tiled segmentation of large rasters.
//!
//! A raster is cut into overlapping tiles that are segmented independently,
//! stitched back into one labeling with dense global segment ids, and
//! described by a paged raster attribute table holding pixel counts and
//! per-segment statistics. Every step is a restartable unit that exchanges
//! data only through an [`coordinator::ArtifactStore`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod raster;
pub mod rat;
pub mod segmentation;
pub mod stats;
pub mod stitch;
pub mod tiling;

#[cfg(test)]
mod tests;

pub use config::{RunConfig, SegmentationConfig, StatsConfig, StitchConfig, TilingConfig};
pub use error::{Error, Result};
