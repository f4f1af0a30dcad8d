//! Raster access boundary.
//!
//! The pipeline never owns pixel storage. It reads bounded windows through
//! [`RasterSource`], writes labels and the attribute table through
//! [`SegmentRaster`], and resolves locations through [`RasterCatalog`].
//! The in-memory implementations in [`memory`] back tests and small runs.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rat::RasterAttributeTable;

pub use memory::{MemCatalog, MemRaster, MemSegmentRaster};

/// Relative tolerance when comparing affine coefficients of two rasters.
const TRANSFORM_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// Affine pixel-to-world transform, GDAL coefficient order:
/// `x = t0 + col * t1 + row * t2`, `y = t3 + col * t4 + row * t5`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl Default for GeoTransform {
    fn default() -> Self {
        Self([0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
    }
}

impl GeoTransform {
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let t = &self.0;
        (
            t[0] + col * t[1] + row * t[2],
            t[3] + col * t[4] + row * t[5],
        )
    }

    pub fn approx_eq(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| {
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= TRANSFORM_TOLERANCE * scale
        })
    }
}

/// Rectangular pixel window. `x`/`y` are the top-left column/row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    #[inline]
    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub const fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.x && col < self.right() && row >= self.y && row < self.bottom()
    }

    pub fn contains_window(&self, other: &Window) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Shared region of two windows, `None` when they do not overlap.
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (x < right && y < bottom).then(|| Window::new(x, y, right - x, bottom - y))
    }

    /// This window expressed relative to the top-left corner of `outer`.
    pub fn relative_to(&self, outer: &Window) -> Window {
        debug_assert!(outer.contains_window(self));
        Window::new(self.x - outer.x, self.y - outer.y, self.width, self.height)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Splits `extent` into row-major blocks of at most `block` x `block`.
pub fn block_windows(width: usize, height: usize, block: usize) -> Vec<Window> {
    assert!(block > 0, "block size must be > 0");
    let mut windows = Vec::with_capacity(width.div_ceil(block) * height.div_ceil(block));
    for y in (0..height).step_by(block) {
        for x in (0..width).step_by(block) {
            windows.push(Window::new(
                x,
                y,
                block.min(width - x),
                block.min(height - y),
            ));
        }
    }
    windows
}

// ============================================================================
// Raster description
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    pub nodata: Option<f64>,
    pub transform: GeoTransform,
    pub projection: String,
}

impl RasterInfo {
    pub fn extent(&self) -> Window {
        Window::new(0, 0, self.width, self.height)
    }

    /// Fails unless `other` covers exactly the same pixel grid.
    pub fn check_aligned(&self, other: &RasterInfo) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(Error::precondition(format!(
                "raster sizes differ: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        if !self.transform.approx_eq(&other.transform) {
            return Err(Error::precondition(format!(
                "georeferencing differs: {:?} vs {:?}",
                self.transform.0, other.transform.0
            )));
        }
        if !self.projection.is_empty()
            && !other.projection.is_empty()
            && self.projection != other.projection
        {
            return Err(Error::precondition(format!(
                "projections differ: '{}' vs '{}'",
                self.projection, other.projection
            )));
        }
        Ok(())
    }

    /// Fails unless `window` is non-empty and lies inside the extent.
    pub fn check_window(&self, window: &Window) -> Result<()> {
        if window.is_empty() || !self.extent().contains_window(window) {
            return Err(Error::raster(format!(
                "window {window} is outside the {}x{} raster",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// True when `value` is this raster's nodata value.
    #[inline]
    pub fn is_nodata(&self, value: f64) -> bool {
        is_nodata(self.nodata, value)
    }
}

#[inline]
pub fn is_nodata(nodata: Option<f64>, value: f64) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

/// Summary statistics for a label band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Caller-chosen address of a raster (path, URL or catalog key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterLocation(pub String);

impl RasterLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RasterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Read-only, windowed access to a multi-band raster.
pub trait RasterSource: Send + Sync {
    fn info(&self) -> &RasterInfo;

    /// Reads one band (0-based) over `window`.
    fn read_window(&self, band: usize, window: Window) -> Result<Buffer2<f64>>;

    fn read_bands(&self, window: Window) -> Result<Vec<Buffer2<f64>>> {
        (0..self.info().bands)
            .map(|band| self.read_window(band, window))
            .collect()
    }
}

/// Single-band label raster with an attached attribute table.
///
/// Methods take `&self`; implementations synchronize internally so one
/// handle can be shared by concurrent readers.
pub trait SegmentRaster: Send + Sync {
    fn info(&self) -> RasterInfo;

    fn read_labels(&self, window: Window) -> Result<Buffer2<u32>>;

    fn write_labels(&self, window: Window, labels: &Buffer2<u32>) -> Result<()>;

    fn rat(&self) -> Option<RasterAttributeTable>;

    fn set_rat(&self, rat: RasterAttributeTable) -> Result<()>;

    fn band_statistics(&self) -> Option<BandStatistics>;

    fn set_band_statistics(&self, stats: BandStatistics) -> Result<()>;
}

/// Resolves [`RasterLocation`]s into open rasters.
pub trait RasterCatalog: Send + Sync {
    fn open_source(&self, location: &RasterLocation) -> Result<Arc<dyn RasterSource>>;

    fn open_segments(&self, location: &RasterLocation) -> Result<Arc<dyn SegmentRaster>>;

    /// Creates (or replaces) a label raster shaped like `info`.
    fn create_segments(
        &self,
        location: &RasterLocation,
        info: &RasterInfo,
    ) -> Result<Arc<dyn SegmentRaster>>;
}

/// Description of a label raster aligned with `source`.
pub fn segment_info_for(source: &RasterInfo) -> RasterInfo {
    RasterInfo {
        width: source.width,
        height: source.height,
        bands: 1,
        pixel_type: PixelType::U32,
        nodata: Some(0.0),
        transform: source.transform,
        projection: source.projection.clone(),
    }
}
