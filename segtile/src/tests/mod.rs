//! End-to-end runs over small synthetic rasters.

mod pipeline;

use std::sync::Arc;

use common::Buffer2;

use crate::config::{RunConfig, SegmentationConfig, TilingConfig};
use crate::coordinator::{
    ArtifactStore, LocalExecutor, MemoryArtifactStore, RunContext, RunReport, RunScope,
};
use crate::error::Result;
use crate::raster::{
    MemCatalog, MemRaster, MemSegmentRaster, PixelType, RasterCatalog, RasterLocation,
};

pub(crate) const INPUT: &str = "input";
pub(crate) const OUTPUT: &str = "segments";

/// 10x10, left half 10, right half 200.
pub(crate) fn two_block_image() -> MemRaster {
    let mut pixels = Vec::with_capacity(100);
    for _ in 0..10 {
        pixels.extend([10.0; 5]);
        pixels.extend([200.0; 5]);
    }
    MemRaster::single_band(Buffer2::new(10, 10, pixels), PixelType::U8, Some(0.0))
}

/// Exact connected-class segmentation on tiles of `tile_width` x
/// `tile_height` with the given overlap.
pub(crate) fn run_config(tile_width: usize, tile_height: usize, overlap: usize) -> RunConfig {
    RunConfig {
        tiling: TilingConfig {
            tile_width,
            tile_height,
            overlap,
            max_segment_diameter: overlap,
            max_tile_pixels: None,
        },
        segmentation: SegmentationConfig {
            subsample_fraction: 1.0,
            min_segment_size: 1,
            ..Default::default()
        },
        workers: 2,
        ..Default::default()
    }
}

pub(crate) struct Harness {
    pub catalog: Arc<MemCatalog>,
    pub store: Arc<MemoryArtifactStore>,
    pub ctx: RunContext,
}

impl Harness {
    pub fn new(config: RunConfig, image: MemRaster) -> Self {
        let store = Arc::new(MemoryArtifactStore::new());
        Self::with_store(config, image, Arc::clone(&store) as Arc<dyn ArtifactStore>, store)
    }

    /// Runs against `store` while keeping `memory` for inspection.
    pub fn with_store(
        config: RunConfig,
        image: MemRaster,
        store: Arc<dyn ArtifactStore>,
        memory: Arc<MemoryArtifactStore>,
    ) -> Self {
        let catalog = Arc::new(MemCatalog::new());
        catalog.insert_source(&location(INPUT), Arc::new(image));
        let ctx = RunContext::new(
            config,
            store,
            Arc::clone(&catalog) as Arc<dyn RasterCatalog>,
        );
        Self {
            catalog,
            store: memory,
            ctx,
        }
    }

    pub fn run(&self, scope: &str) -> Result<RunReport> {
        LocalExecutor::new(self.ctx.config.workers).run(
            &RunScope::new(scope)?,
            &location(INPUT),
            &location(OUTPUT),
            &self.ctx,
        )
    }

    pub fn output(&self) -> Arc<MemSegmentRaster> {
        self.catalog
            .segments(&location(OUTPUT))
            .expect("output raster was not created")
    }
}

pub(crate) fn location(name: &str) -> RasterLocation {
    RasterLocation::new(name)
}

/// Asserts that two label grids describe the same partition.
pub(crate) fn assert_same_partition(a: &Buffer2<u32>, b: &Buffer2<u32>) {
    assert_eq!((a.width(), a.height()), (b.width(), b.height()));
    let mut forward = hashbrown::HashMap::new();
    let mut backward = hashbrown::HashMap::new();
    for (i, (&la, &lb)) in a.pixels().iter().zip(b.pixels()).enumerate() {
        assert_eq!(la == 0, lb == 0, "nodata differs at pixel {i}");
        if la == 0 {
            continue;
        }
        assert_eq!(*forward.entry(la).or_insert(lb), lb, "label {la} split at pixel {i}");
        assert_eq!(*backward.entry(lb).or_insert(la), la, "label {lb} split at pixel {i}");
    }
}
