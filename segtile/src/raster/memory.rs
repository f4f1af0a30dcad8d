//! In-memory rasters and catalog.

use std::sync::Arc;

use common::Buffer2;
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{
    BandStatistics, GeoTransform, PixelType, RasterCatalog, RasterInfo, RasterLocation,
    RasterSource, SegmentRaster, Window,
};
use crate::error::{Error, Result};
use crate::rat::RasterAttributeTable;

/// Multi-band raster held as `f64` planes.
#[derive(Debug)]
pub struct MemRaster {
    info: RasterInfo,
    bands: Vec<Buffer2<f64>>,
}

impl MemRaster {
    pub fn new(info: RasterInfo, bands: Vec<Buffer2<f64>>) -> Result<Self> {
        if bands.len() != info.bands {
            return Err(Error::raster(format!(
                "expected {} bands, got {}",
                info.bands,
                bands.len()
            )));
        }
        if let Some(bad) = bands
            .iter()
            .position(|b| b.width() != info.width || b.height() != info.height)
        {
            return Err(Error::raster(format!(
                "band {bad} is {}x{}, raster is {}x{}",
                bands[bad].width(),
                bands[bad].height(),
                info.width,
                info.height
            )));
        }
        Ok(Self { info, bands })
    }

    /// Single-band raster with the default north-up unit transform.
    pub fn single_band(
        pixels: Buffer2<f64>,
        pixel_type: PixelType,
        nodata: Option<f64>,
    ) -> Self {
        let info = RasterInfo {
            width: pixels.width(),
            height: pixels.height(),
            bands: 1,
            pixel_type,
            nodata,
            transform: GeoTransform::default(),
            projection: String::new(),
        };
        Self {
            info,
            bands: vec![pixels],
        }
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.info.transform = transform;
        self
    }
}

impl RasterSource for MemRaster {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, band: usize, window: Window) -> Result<Buffer2<f64>> {
        self.info.check_window(&window)?;
        let plane = self.bands.get(band).ok_or_else(|| {
            Error::raster(format!(
                "band {band} requested from a {}-band raster",
                self.info.bands
            ))
        })?;
        Ok(plane.crop(window.x, window.y, window.width, window.height))
    }
}

#[derive(Debug)]
struct SegmentState {
    labels: Buffer2<u32>,
    rat: Option<RasterAttributeTable>,
    band_stats: Option<BandStatistics>,
}

/// Label raster kept in memory behind a read-write lock.
#[derive(Debug)]
pub struct MemSegmentRaster {
    info: RasterInfo,
    state: RwLock<SegmentState>,
}

impl MemSegmentRaster {
    pub fn new(info: RasterInfo) -> Self {
        let labels = Buffer2::new_filled(info.width, info.height, 0u32);
        Self::from_labels(info, labels)
    }

    pub fn from_labels(info: RasterInfo, labels: Buffer2<u32>) -> Self {
        debug_assert_eq!(labels.width(), info.width);
        debug_assert_eq!(labels.height(), info.height);
        Self {
            info,
            state: RwLock::new(SegmentState {
                labels,
                rat: None,
                band_stats: None,
            }),
        }
    }

    /// Snapshot of the full label grid.
    pub fn labels(&self) -> Buffer2<u32> {
        self.state.read().labels.clone()
    }
}

impl SegmentRaster for MemSegmentRaster {
    fn info(&self) -> RasterInfo {
        self.info.clone()
    }

    fn read_labels(&self, window: Window) -> Result<Buffer2<u32>> {
        self.info.check_window(&window)?;
        Ok(self
            .state
            .read()
            .labels
            .crop(window.x, window.y, window.width, window.height))
    }

    fn write_labels(&self, window: Window, labels: &Buffer2<u32>) -> Result<()> {
        self.info.check_window(&window)?;
        if labels.width() != window.width || labels.height() != window.height {
            return Err(Error::raster(format!(
                "label block {}x{} does not match window {window}",
                labels.width(),
                labels.height()
            )));
        }
        self.state.write().labels.paste(window.x, window.y, labels);
        Ok(())
    }

    fn rat(&self) -> Option<RasterAttributeTable> {
        self.state.read().rat.clone()
    }

    fn set_rat(&self, rat: RasterAttributeTable) -> Result<()> {
        self.state.write().rat = Some(rat);
        Ok(())
    }

    fn band_statistics(&self) -> Option<BandStatistics> {
        self.state.read().band_stats
    }

    fn set_band_statistics(&self, stats: BandStatistics) -> Result<()> {
        self.state.write().band_stats = Some(stats);
        Ok(())
    }
}

/// Catalog resolving locations to in-memory rasters.
#[derive(Default)]
pub struct MemCatalog {
    sources: RwLock<HashMap<String, Arc<dyn RasterSource>>>,
    segments: RwLock<HashMap<String, Arc<MemSegmentRaster>>>,
}

impl MemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, location: &RasterLocation, source: Arc<dyn RasterSource>) {
        self.sources.write().insert(location.0.clone(), source);
    }

    pub fn insert_segments(&self, location: &RasterLocation, segments: Arc<MemSegmentRaster>) {
        self.segments.write().insert(location.0.clone(), segments);
    }

    /// Concrete handle to a label raster created through this catalog.
    pub fn segments(&self, location: &RasterLocation) -> Option<Arc<MemSegmentRaster>> {
        self.segments.read().get(location.as_str()).cloned()
    }
}

impl RasterCatalog for MemCatalog {
    fn open_source(&self, location: &RasterLocation) -> Result<Arc<dyn RasterSource>> {
        if let Some(source) = self.sources.read().get(location.as_str()) {
            return Ok(Arc::clone(source));
        }
        // Label rasters double as attribute sources (e.g. zonal stats of labels).
        self.segments
            .read()
            .get(location.as_str())
            .map(|seg| Arc::new(LabelsAsSource::new(seg)) as Arc<dyn RasterSource>)
            .ok_or_else(|| Error::raster(format!("no raster at '{location}'")))
    }

    fn open_segments(&self, location: &RasterLocation) -> Result<Arc<dyn SegmentRaster>> {
        self.segments
            .read()
            .get(location.as_str())
            .map(|seg| Arc::clone(seg) as Arc<dyn SegmentRaster>)
            .ok_or_else(|| Error::raster(format!("no label raster at '{location}'")))
    }

    fn create_segments(
        &self,
        location: &RasterLocation,
        info: &RasterInfo,
    ) -> Result<Arc<dyn SegmentRaster>> {
        let raster = Arc::new(MemSegmentRaster::new(info.clone()));
        self.segments
            .write()
            .insert(location.0.clone(), Arc::clone(&raster));
        Ok(raster)
    }
}

/// Frozen copy of a label raster exposed as a one-band source.
struct LabelsAsSource {
    info: RasterInfo,
    labels: Buffer2<f64>,
}

impl LabelsAsSource {
    fn new(segments: &MemSegmentRaster) -> Self {
        Self {
            info: segments.info(),
            labels: segments.labels().map(|&l| l as f64),
        }
    }
}

impl RasterSource for LabelsAsSource {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, band: usize, window: Window) -> Result<Buffer2<f64>> {
        self.info.check_window(&window)?;
        if band != 0 {
            return Err(Error::raster(format!(
                "band {band} requested from a label raster"
            )));
        }
        Ok(self
            .labels
            .crop(window.x, window.y, window.width, window.height))
    }
}
