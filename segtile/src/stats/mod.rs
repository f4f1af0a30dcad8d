//! Per-segment statistics over an aligned attribute source.
//!
//! The label raster and the source are streamed block by block. Each block
//! produces partial aggregates per segment id; partials are folded into
//! paged rows, and a row is complete once it has absorbed as many pixels as
//! the histogram says the segment has. Completed pages are written into the
//! attribute table and dropped, so memory stays bounded by the pages that
//! are still open.

mod accumulate;
mod custom;


use std::collections::BTreeSet;
use std::sync::Arc;

use common::parallel::try_par_for_each_chunk;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::StatsConfig;
use crate::error::{Error, Result};
use crate::raster::{
    block_windows, is_nodata, GeoTransform, RasterLocation, RasterSource, SegmentRaster, Window,
};
use crate::rat::{
    ColumnType, ColumnUsage, ColumnValues, Page, PageArena, PageId, PageSummary,
    RasterAttributeTable,
};

pub use accumulate::{MomentAccumulator, SpatialAccumulator, ValueHistogram};
pub use custom::{
    CustomColumn, CustomSelection, SegmentPixel, SpatialStatFn, SpatialStatRegistry, Variogram,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Statistic {
    Count,
    Sum,
    Min,
    Max,
    Mean,
    /// Population standard deviation.
    StdDev,
    Median,
    Mode,
    /// Nearest-rank percentile, `0..=100`.
    Percentile(f64),
}

impl Statistic {
    /// Order statistics need exact value counts.
    pub fn needs_values(self) -> bool {
        matches!(self, Self::Median | Self::Mode | Self::Percentile(_))
    }
}

/// Spatial columns. Bounding box and representative pixel are pixel
/// columns/rows; the centroid is in world coordinates of the pixel centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialStatistic {
    XMin,
    XMax,
    YMin,
    YMax,
    RepresentativeX,
    RepresentativeY,
    CentroidX,
    CentroidY,
}

impl SpatialStatistic {
    pub fn column_type(self) -> ColumnType {
        match self {
            Self::CentroidX | Self::CentroidY => ColumnType::Real,
            _ => ColumnType::Integer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSelection {
    pub column: String,
    pub statistic: Statistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSelection {
    pub column: String,
    pub statistic: SpatialStatistic,
}

/// One statistics pass: a band of an attribute source and the columns to
/// fill from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsRequest {
    /// Attribute source; the segmented input when `None`.
    pub image: Option<RasterLocation>,
    /// 0-based band index.
    pub band: usize,
    /// Skip source pixels equal to the source's nodata value.
    pub exclude_nodata: bool,
    pub selection: Vec<StatSelection>,
    pub spatial: Vec<SpatialSelection>,
    /// Registered functions over each segment's pixels.
    pub custom: Vec<CustomSelection>,
}

impl Default for StatsRequest {
    fn default() -> Self {
        Self {
            image: None,
            band: 0,
            exclude_nodata: true,
            selection: Vec::new(),
            spatial: Vec::new(),
            custom: Vec::new(),
        }
    }
}

impl StatsRequest {
    pub fn validate(&self) -> Result<()> {
        if self.selection.is_empty() && self.spatial.is_empty() && self.custom.is_empty() {
            return Err(Error::config("stats.requests", "request selects no statistics"));
        }
        let mut names = BTreeSet::new();
        let columns = self
            .selection
            .iter()
            .map(|s| &s.column)
            .chain(self.spatial.iter().map(|s| &s.column))
            .chain(self.custom.iter().flat_map(|c| c.columns.iter().map(|col| &col.name)));
        for name in columns {
            if name.is_empty() {
                return Err(Error::config("stats.requests", "column name is empty"));
            }
            if !names.insert(name.as_str()) {
                return Err(Error::config(
                    "stats.requests",
                    format!("column '{name}' is selected twice"),
                ));
            }
        }
        for custom in &self.custom {
            if custom.columns.is_empty() {
                return Err(Error::config(
                    "stats.requests",
                    format!("function '{}' fills no columns", custom.function),
                ));
            }
            if let Some(column) = custom
                .columns
                .iter()
                .find(|c| c.column_type == ColumnType::String)
            {
                return Err(Error::config(
                    "stats.requests",
                    format!("column '{}' must be real or integer", column.name),
                ));
            }
        }
        for selection in &self.selection {
            if let Statistic::Percentile(p) = selection.statistic {
                if !(0.0..=100.0).contains(&p) {
                    return Err(Error::config(
                        "stats.requests",
                        format!("percentile {p} for '{}' is outside 0..=100", selection.column),
                    ));
                }
            }
        }
        Ok(())
    }

    fn needs_values(&self) -> bool {
        self.selection.iter().any(|s| s.statistic.needs_values())
    }
}

/// What a statistics pass wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSummary {
    pub segments: u32,
    pub pages_written: usize,
    pub pixels: u64,
}

/// Running aggregate for one segment id.
#[derive(Debug, Clone, Default)]
struct StatsRow {
    /// Label pixels seen, nodata source pixels included.
    seen: u64,
    moments: MomentAccumulator,
    values: ValueHistogram,
    spatial: SpatialAccumulator,
    pixels: Vec<SegmentPixel>,
}

impl StatsRow {
    fn merge(&mut self, other: &Self) {
        self.seen += other.seen;
        self.moments.merge(&other.moments);
        self.values.merge(&other.values);
        self.spatial.merge(&other.spatial);
        self.pixels.extend_from_slice(&other.pixels);
    }

    fn statistic(&self, statistic: Statistic) -> f64 {
        let m = &self.moments;
        let value = match statistic {
            Statistic::Count => Some(m.count() as f64),
            Statistic::Sum => Some(m.sum()),
            Statistic::Min => m.min(),
            Statistic::Max => m.max(),
            Statistic::Mean => m.mean(),
            Statistic::StdDev => m.std_dev(),
            Statistic::Median => self.values.median().map(|v| v as f64),
            Statistic::Mode => self.values.mode().map(|v| v as f64),
            Statistic::Percentile(p) => self.values.percentile(p).map(|v| v as f64),
        };
        value.unwrap_or(0.0)
    }

    fn spatial_integer(&self, statistic: SpatialStatistic) -> i64 {
        let s = &self.spatial;
        let value = match statistic {
            SpatialStatistic::XMin => s.bounds().map(|b| b.0),
            SpatialStatistic::XMax => s.bounds().map(|b| b.1),
            SpatialStatistic::YMin => s.bounds().map(|b| b.2),
            SpatialStatistic::YMax => s.bounds().map(|b| b.3),
            SpatialStatistic::RepresentativeX => s.representative().map(|r| r.0),
            SpatialStatistic::RepresentativeY => s.representative().map(|r| r.1),
            SpatialStatistic::CentroidX | SpatialStatistic::CentroidY => None,
        };
        value.map_or(0, |v| v as i64)
    }

    fn centroid(&self, statistic: SpatialStatistic, transform: &GeoTransform) -> f64 {
        let Some((col, row)) = self.spatial.centroid() else {
            return 0.0;
        };
        let (x, y) = transform.pixel_to_world(col + 0.5, row + 0.5);
        match statistic {
            SpatialStatistic::CentroidY => y,
            _ => x,
        }
    }
}

/// Computes the requested columns for every segment and stores them in the
/// label raster's attribute table.
///
/// The table must already hold the histogram. Nothing is stored unless
/// every segment received exactly its histogram's pixel count. Custom
/// selections resolve against [`SpatialStatRegistry::with_builtins`].
pub fn calc_segment_stats(
    segments: &dyn SegmentRaster,
    source: &dyn RasterSource,
    request: &StatsRequest,
    config: &StatsConfig,
    page_size: u32,
) -> Result<StatsSummary> {
    let functions = SpatialStatRegistry::with_builtins();
    calc_segment_stats_with(segments, source, request, config, page_size, &functions)
}

/// [`calc_segment_stats`] with custom selections resolved against
/// `functions`.
pub fn calc_segment_stats_with(
    segments: &dyn SegmentRaster,
    source: &dyn RasterSource,
    request: &StatsRequest,
    config: &StatsConfig,
    page_size: u32,
    functions: &SpatialStatRegistry,
) -> Result<StatsSummary> {
    config.validate()?;
    request.validate()?;
    let custom = request
        .custom
        .iter()
        .map(|selection| Ok((selection, functions.get(&selection.function)?)))
        .collect::<Result<Vec<_>>>()?;

    let info = source.info();
    let segment_info = segments.info();
    info.check_aligned(&segment_info)?;
    if request.band >= info.bands {
        return Err(Error::precondition(format!(
            "band {} requested from a source with {} band(s)",
            request.band, info.bands
        )));
    }
    if info.pixel_type.is_float() {
        if request.needs_values() {
            return Err(Error::config(
                "stats.requests",
                format!(
                    "median, mode and percentile need an integer source, got {:?}",
                    info.pixel_type
                ),
            ));
        }
        if !config.allow_float {
            return Err(Error::precondition(format!(
                "source pixel type {:?} is floating point; set allow_float to opt in",
                info.pixel_type
            )));
        }
    }

    let mut rat = segments
        .rat()
        .ok_or_else(|| Error::precondition("label raster has no attribute table"))?;
    let expected: Vec<u64> = rat
        .histogram()
        .ok_or_else(|| Error::precondition("attribute table has no histogram column"))?
        .iter()
        .map(|&count| count as u64)
        .collect();
    let max_id = expected.len().saturating_sub(1) as u32;

    for selection in &request.selection {
        rat.ensure_column(&selection.column, ColumnType::Real, ColumnUsage::Generic)?;
    }
    for selection in &request.spatial {
        rat.ensure_column(
            &selection.column,
            selection.statistic.column_type(),
            ColumnUsage::Generic,
        )?;
    }
    for column in request.custom.iter().flat_map(|c| &c.columns) {
        rat.ensure_column(&column.name, column.column_type, ColumnUsage::Generic)?;
    }

    let windows = block_windows(info.width, info.height, config.tile_size);
    tracing::info!(
        band = request.band,
        blocks = windows.len(),
        read_workers = config.read_workers,
        segments = max_id,
        "Calculating segment statistics"
    );

    let mut collector = Collector {
        arena: PageArena::new(page_size, max_id)?,
        expected: &expected,
        done: HashMap::new(),
        flushed: BTreeSet::new(),
        request,
        custom: &custom,
        transform: info.transform,
        rat: &mut rat,
        pixels: 0,
    };
    let block = BlockReader {
        segments,
        source,
        request,
        nodata: info.nodata,
        keep_values: request.needs_values(),
        keep_spatial: !request.spatial.is_empty(),
        keep_pixels: !request.custom.is_empty(),
    };

    try_par_for_each_chunk(
        &windows,
        config.read_workers,
        |&window| block.aggregate(window),
        |partials| {
            partials
                .into_iter()
                .try_for_each(|partial| collector.absorb(partial))
        },
    )?;
    let summary = collector.finish()?;

    segments.set_rat(rat)?;
    tracing::info!(
        band = request.band,
        pages = summary.pages_written,
        pixels = summary.pixels,
        "Segment statistics written"
    );
    Ok(summary)
}

struct BlockReader<'a> {
    segments: &'a dyn SegmentRaster,
    source: &'a dyn RasterSource,
    request: &'a StatsRequest,
    nodata: Option<f64>,
    keep_values: bool,
    keep_spatial: bool,
    keep_pixels: bool,
}

impl BlockReader<'_> {
    fn aggregate(&self, window: Window) -> Result<HashMap<u32, StatsRow>> {
        let labels = self.segments.read_labels(window)?;
        let values = self.source.read_window(self.request.band, window)?;

        let mut rows: HashMap<u32, StatsRow> = HashMap::new();
        for ly in 0..window.height {
            let label_row = labels.row(ly);
            let value_row = values.row(ly);
            for (lx, (&id, &value)) in label_row.iter().zip(value_row).enumerate() {
                if id == 0 {
                    continue;
                }
                let row = rows.entry(id).or_default();
                row.seen += 1;
                if self.request.exclude_nodata && is_nodata(self.nodata, value) {
                    continue;
                }
                row.moments.push(value);
                if self.keep_values {
                    row.values.push(value.round() as i64);
                }
                if self.keep_spatial {
                    row.spatial.push(window.x + lx, window.y + ly);
                }
                if self.keep_pixels {
                    row.pixels.push(SegmentPixel {
                        col: window.x + lx,
                        row: window.y + ly,
                        value,
                    });
                }
            }
        }
        Ok(rows)
    }
}

/// Single-writer side of the pass: owns the open pages and the table.
struct Collector<'a> {
    arena: PageArena<StatsRow>,
    expected: &'a [u64],
    /// Completed rows per open page.
    done: HashMap<PageId, usize>,
    flushed: BTreeSet<PageId>,
    request: &'a StatsRequest,
    custom: &'a [(&'a CustomSelection, Arc<dyn SpatialStatFn>)],
    transform: GeoTransform,
    rat: &'a mut RasterAttributeTable,
    pixels: u64,
}

impl Collector<'_> {
    fn absorb(&mut self, partial: HashMap<u32, StatsRow>) -> Result<()> {
        for (id, part) in partial {
            let page = self.arena.page_for(id)?;
            if self.flushed.contains(&page) {
                let expected = self.expected[id as usize];
                return Err(Error::HistogramExceeded {
                    id,
                    seen: expected + part.seen,
                    expected,
                });
            }
            if !self.arena.contains(page) {
                self.open_page(page)?;
            }

            let row = self.arena.row_mut(id)?;
            row.merge(&part);
            let seen = row.seen;
            let expected = self.expected[id as usize];
            if seen > expected {
                return Err(Error::HistogramExceeded { id, seen, expected });
            }
            self.pixels += part.seen;
            if seen == expected {
                let done = self.done.entry(page).or_default();
                *done += 1;
                let len = self.arena.page(page).map_or(0, |p| p.len());
                if *done == len {
                    self.flush(page)?;
                }
            }
        }
        Ok(())
    }

    fn open_page(&mut self, page: PageId) -> Result<()> {
        self.arena.create_slot(page)?;
        let empty = self.arena.slot_range(page).map_or(0, |range| {
            range
                .filter(|&id| self.expected[id as usize] == 0)
                .count()
        });
        self.done.insert(page, empty);
        Ok(())
    }

    fn flush(&mut self, page_id: PageId) -> Result<()> {
        let Some(page) = self.arena.remove(page_id) else {
            return Ok(());
        };
        self.done.remove(&page_id);
        self.flushed.insert(page_id);
        write_page(self.rat, &page, self.request, self.custom, &self.transform)?;
        tracing::debug!(
            page = page_id,
            start = page.start(),
            end = page.end(),
            "Statistics page complete"
        );
        Ok(())
    }

    fn finish(self) -> Result<StatsSummary> {
        let mut incomplete = Vec::new();
        for page in 0..self.arena.slot_count() {
            let Some(range) = self.arena.slot_range(page) else {
                continue;
            };
            if self.flushed.contains(&page) {
                continue;
            }
            let pending: Vec<u32> = match self.arena.page(page) {
                Some(open) => range
                    .filter(|&id| {
                        open.row(id).map_or(0, |r| r.seen) != self.expected[id as usize]
                    })
                    .collect(),
                None => range
                    .filter(|&id| self.expected[id as usize] > 0)
                    .collect(),
            };
            if pending.is_empty() {
                continue;
            }
            incomplete.push(PageSummary {
                page,
                start: page_start(&self.arena, page),
                end: page_end(&self.arena, page),
                incomplete_rows: pending.len() as u32,
                first_missing: pending.first().copied(),
            });
        }
        if !incomplete.is_empty() {
            tracing::error!(
                pages = incomplete.len(),
                first = %incomplete[0],
                "Statistics pass left incomplete pages"
            );
            return Err(Error::IncompletePages { pages: incomplete });
        }

        let segments = self.expected.iter().skip(1).filter(|&&n| n > 0).count() as u32;
        Ok(StatsSummary {
            segments,
            pages_written: self.flushed.len(),
            pixels: self.pixels,
        })
    }
}

fn page_start(arena: &PageArena<StatsRow>, page: PageId) -> u32 {
    arena.slot_range(page).map_or(0, |r| *r.start())
}

fn page_end(arena: &PageArena<StatsRow>, page: PageId) -> u32 {
    arena.slot_range(page).map_or(0, |r| *r.end())
}

fn write_page(
    rat: &mut RasterAttributeTable,
    page: &Page<StatsRow>,
    request: &StatsRequest,
    custom: &[(&CustomSelection, Arc<dyn SpatialStatFn>)],
    transform: &GeoTransform,
) -> Result<()> {
    let start = page.start() as usize;
    for selection in &request.selection {
        let values = page
            .rows()
            .iter()
            .map(|row| row.statistic(selection.statistic))
            .collect();
        rat.set_values(&selection.column, start, ColumnValues::Real(values))?;
    }
    for selection in &request.spatial {
        let values = match selection.statistic.column_type() {
            ColumnType::Real => ColumnValues::Real(
                page.rows()
                    .iter()
                    .map(|row| row.centroid(selection.statistic, transform))
                    .collect(),
            ),
            _ => ColumnValues::Integer(
                page.rows()
                    .iter()
                    .map(|row| row.spatial_integer(selection.statistic))
                    .collect(),
            ),
        };
        rat.set_values(&selection.column, start, values)?;
    }
    for (selection, function) in custom {
        write_custom_columns(rat, page, selection, function.as_ref())?;
    }
    Ok(())
}

fn write_custom_columns(
    rat: &mut RasterAttributeTable,
    page: &Page<StatsRow>,
    selection: &CustomSelection,
    function: &dyn SpatialStatFn,
) -> Result<()> {
    let columns = selection.columns.len();
    let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(page.len()); columns];
    for (offset, row) in page.rows().iter().enumerate() {
        if row.pixels.is_empty() {
            values.iter_mut().for_each(|column| column.push(0.0));
            continue;
        }
        let mut pixels = row.pixels.clone();
        pixels.sort_unstable_by_key(|p| (p.row, p.col));
        let computed = function.compute(&pixels, selection.param, columns);
        if computed.len() != columns {
            return Err(Error::precondition(format!(
                "function '{}' returned {} value(s) for segment {}, expected {columns}",
                selection.function,
                computed.len(),
                page.start() as usize + offset
            )));
        }
        for (column, value) in values.iter_mut().zip(computed) {
            column.push(value);
        }
    }

    let start = page.start() as usize;
    for (column, values) in selection.columns.iter().zip(values) {
        let values = match column.column_type {
            ColumnType::Integer => {
                ColumnValues::Integer(values.into_iter().map(|v| v.round() as i64).collect())
            }
            _ => ColumnValues::Real(values),
        };
        rat.set_values(&column.name, start, values)?;
    }
    Ok(())
}
