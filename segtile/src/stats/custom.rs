//! Caller-supplied per-segment statistics.
//!
//! A [`SpatialStatFn`] sees every pixel of one segment at once and fills
//! its own set of columns. Functions are registered under a name so that a
//! serialized [`StatsRequest`](super::StatsRequest) can refer to them.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rat::ColumnType;

/// One pixel of a segment: raster column, raster row and source value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPixel {
    pub col: usize,
    pub row: usize,
    pub value: f64,
}

/// Computes one row of values for a segment.
pub trait SpatialStatFn: Send + Sync {
    /// `pixels` are in raster scan order and never empty. Must return one
    /// value per column; integer columns receive the value rounded.
    fn compute(&self, pixels: &[SegmentPixel], param: f64, columns: usize) -> Vec<f64>;
}

impl<F> SpatialStatFn for F
where
    F: Fn(&[SegmentPixel], f64, usize) -> Vec<f64> + Send + Sync,
{
    fn compute(&self, pixels: &[SegmentPixel], param: f64, columns: usize) -> Vec<f64> {
        self(pixels, param, columns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// A registered function and the columns it fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSelection {
    pub function: String,
    #[serde(default)]
    pub param: f64,
    pub columns: Vec<CustomColumn>,
}

/// Named [`SpatialStatFn`]s available to statistics passes.
#[derive(Clone, Default)]
pub struct SpatialStatRegistry {
    functions: HashMap<String, Arc<dyn SpatialStatFn>>,
}

impl SpatialStatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the functions shipped with the crate: `variogram`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("variogram", Variogram);
        registry
    }

    /// Adds or replaces a function.
    pub fn register(&mut self, name: impl Into<String>, function: impl SpatialStatFn + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SpatialStatFn>> {
        self.functions.get(name).cloned().ok_or_else(|| {
            Error::config(
                "stats.requests",
                format!("no spatial statistic function named '{name}'"),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl fmt::Debug for SpatialStatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SpatialStatRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Semivariance along rows and columns, column `i` at lag `i + 1`.
///
/// Only pixel pairs where both pixels belong to the segment count; a lag
/// without any such pair yields 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Variogram;

impl SpatialStatFn for Variogram {
    fn compute(&self, pixels: &[SegmentPixel], _param: f64, columns: usize) -> Vec<f64> {
        let values: HashMap<(usize, usize), f64> =
            pixels.iter().map(|p| ((p.col, p.row), p.value)).collect();
        (1..=columns)
            .map(|lag| {
                let mut sum = 0.0;
                let mut pairs = 0u64;
                for p in pixels {
                    for (dc, dr) in [(lag, 0), (0, lag)] {
                        if let Some(&other) = values.get(&(p.col + dc, p.row + dr)) {
                            let d = p.value - other;
                            sum += d * d;
                            pairs += 1;
                        }
                    }
                }
                if pairs == 0 {
                    0.0
                } else {
                    sum / (2.0 * pairs as f64)
                }
            })
            .collect()
    }
}
