//! Raster attribute table and its paged builders.
//!
//! The table is column oriented and keyed by global segment id (row 0 is
//! the background). Builders accumulate rows in fixed-size pages over
//! contiguous id ranges and only write a page into the table once every row
//! in it is complete.

mod colour;
mod engine;
mod page;


use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use colour::{estimate_stats_from_histogram, write_random_colour_table};
pub use engine::RatEngine;
pub use page::{Page, PageArena, PageId, PageSummary};

/// Name of the pixel count column.
pub const HISTOGRAM_COLUMN: &str = "Histogram";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnUsage {
    PixelCount,
    Red,
    Green,
    Blue,
    Alpha,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Real,
    Integer,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    Real(Vec<f64>),
    Integer(Vec<i64>),
    String(Vec<String>),
}

impl ColumnValues {
    fn empty(column_type: ColumnType, len: usize) -> Self {
        match column_type {
            ColumnType::Real => Self::Real(vec![0.0; len]),
            ColumnType::Integer => Self::Integer(vec![0; len]),
            ColumnType::String => Self::String(vec![String::new(); len]),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Real(_) => ColumnType::Real,
            Self::Integer(_) => ColumnType::Integer,
            Self::String(_) => ColumnType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resize(&mut self, len: usize) {
        match self {
            Self::Real(v) => v.resize(len, 0.0),
            Self::Integer(v) => v.resize(len, 0),
            Self::String(v) => v.resize(len, String::new()),
        }
    }

    /// Overwrites `values.len()` rows starting at `start`.
    fn write(&mut self, start: usize, values: ColumnValues) -> bool {
        match (self, values) {
            (Self::Real(dst), Self::Real(src)) => {
                dst[start..start + src.len()].copy_from_slice(&src)
            }
            (Self::Integer(dst), Self::Integer(src)) => {
                dst[start..start + src.len()].copy_from_slice(&src)
            }
            (Self::String(dst), Self::String(src)) => {
                for (d, s) in dst[start..].iter_mut().zip(src) {
                    *d = s;
                }
            }
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub usage: ColumnUsage,
    pub values: ColumnValues,
}

/// Column-oriented attribute table, one row per segment id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterAttributeTable {
    row_count: usize,
    columns: Vec<Column>,
}

impl RasterAttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Grows or shrinks every column; new rows are zero / empty.
    pub fn set_row_count(&mut self, rows: usize) {
        self.row_count = rows;
        for column in &mut self.columns {
            column.values.resize(rows);
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_of_usage(&self, usage: ColumnUsage) -> Option<&Column> {
        self.columns.iter().find(|c| c.usage == usage)
    }

    /// Adds a column unless one of that name exists. An existing column of a
    /// different type is an error.
    pub fn ensure_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        usage: ColumnUsage,
    ) -> Result<()> {
        if let Some(existing) = self.column(name) {
            let existing_type = existing.values.column_type();
            if existing_type != column_type {
                return Err(Error::precondition(format!(
                    "column '{name}' exists as {existing_type:?}, requested {column_type:?}"
                )));
            }
            return Ok(());
        }
        self.columns.push(Column {
            name: name.to_string(),
            usage,
            values: ColumnValues::empty(column_type, self.row_count),
        });
        Ok(())
    }

    /// Writes a contiguous block of rows, growing the table if needed.
    pub fn set_values(
        &mut self,
        name: &str,
        start_row: usize,
        values: ColumnValues,
    ) -> Result<()> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::precondition(format!("column '{name}' does not exist")))?;
        let expected = self.columns[idx].values.column_type();
        let given = values.column_type();
        if expected != given {
            return Err(Error::precondition(format!(
                "column '{name}' holds {expected:?} values, got {given:?}"
            )));
        }

        let end = start_row + values.len();
        if end > self.row_count {
            self.set_row_count(end);
        }
        let written = self.columns[idx].values.write(start_row, values);
        debug_assert!(written);
        Ok(())
    }

    pub fn real(&self, name: &str) -> Option<&[f64]> {
        match &self.column(name)?.values {
            ColumnValues::Real(v) => Some(v),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<&[i64]> {
        match &self.column(name)?.values {
            ColumnValues::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Pixel counts per id, from the first column with pixel count usage.
    pub fn histogram(&self) -> Option<&[f64]> {
        match &self.column_of_usage(ColumnUsage::PixelCount)?.values {
            ColumnValues::Real(v) => Some(v),
            _ => None,
        }
    }
}
