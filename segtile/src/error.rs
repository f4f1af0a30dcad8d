//! Error types for tiling, stitching, attribute tables and unit execution.

use std::io;

use thiserror::Error;

use crate::coordinator::UnitId;
use crate::rat::PageSummary;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised anywhere in the segmentation pipeline.
///
/// Configuration and precondition errors are raised before any pixels are
/// touched. Page errors mean the attribute table is inconsistent with the
/// labels and must not be used.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: &'static str, reason: String },

    #[error("Precondition failed: {reason}")]
    Precondition { reason: String },

    #[error("Raster access failed: {reason}")]
    Raster { reason: String },

    #[error("Segment id {id} is outside the table range 1..={max_id}")]
    IdOutOfRange { id: u32, max_id: u32 },

    #[error("No page allocated for segment id {id}")]
    UnknownPage { id: u32 },

    #[error("Page {page} (ids {start}..={end}) overlaps an existing page")]
    PageOverlap { page: u32, start: u32, end: u32 },

    #[error("Page {page} (ids {start}..={end}) has {} unpopulated row(s), first {}", .missing.len(), first_id(.missing))]
    RowsNotPopulated {
        page: u32,
        start: u32,
        end: u32,
        missing: Vec<u32>,
    },

    #[error("Segment {id} received {seen} pixels but its histogram holds {expected}")]
    HistogramExceeded { id: u32, seen: u64, expected: u64 },

    #[error("{} attribute page(s) incomplete: {}", .pages.len(), PageSummary::join(.pages))]
    IncompletePages { pages: Vec<PageSummary> },

    #[error("{unit} is not ready, missing: {}", .missing.join(", "))]
    DependencyNotReady { unit: UnitId, missing: Vec<String> },

    #[error("Artifact '{key}' is missing")]
    MissingArtifact { key: String },

    #[error("Artifact store failed at '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode or decode artifact '{key}': {reason}")]
    Codec { key: String, reason: String },

    #[error("{unit} failed: {source}")]
    Unit {
        unit: UnitId,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to load configuration: {0}")]
    ConfigFile(#[from] common::SerdeFormatError),
}

fn first_id(ids: &[u32]) -> String {
    ids.first()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    pub(crate) fn raster(reason: impl Into<String>) -> Self {
        Self::Raster {
            reason: reason.into(),
        }
    }

    pub(crate) fn in_unit(self, unit: UnitId) -> Self {
        match self {
            Self::Unit { .. } | Self::DependencyNotReady { .. } => self,
            other => Self::Unit {
                unit,
                source: Box::new(other),
            },
        }
    }

    /// True for failures that a targeted re-run of the same unit can fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store { .. } | Self::Raster { .. } | Self::MissingArtifact { .. } => true,
            Self::Unit { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::UnitKind;

    #[test]
    fn test_config_error_names_field() {
        let err = Error::config("tiling.overlap", "must be at least 1");
        let msg = err.to_string();
        assert!(msg.contains("tiling.overlap"));
        assert!(msg.contains("must be at least 1"));
    }

    #[test]
    fn test_rows_not_populated_names_page_and_first_id() {
        let err = Error::RowsNotPopulated {
            page: 2,
            start: 20,
            end: 29,
            missing: vec![23, 27],
        };
        let msg = err.to_string();
        assert!(msg.contains("Page 2"));
        assert!(msg.contains("20..=29"));
        assert!(msg.contains("2 unpopulated"));
        assert!(msg.contains("first 23"));
    }

    #[test]
    fn test_unit_wrapping_identifies_tile() {
        let unit = UnitId::new(UnitKind::Segment, 7);
        let err = Error::raster("read failed").in_unit(unit);
        let msg = err.to_string();
        assert!(msg.contains("segment unit 7"));
        assert!(msg.contains("read failed"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unit_wrapping_is_not_nested() {
        let unit = UnitId::new(UnitKind::Stitch, 1);
        let err = Error::precondition("x").in_unit(unit).in_unit(unit);
        match err {
            Error::Unit { source, .. } => assert!(matches!(*source, Error::Precondition { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::Store {
            key: "run/segment/00001.json".to_string(),
            source: io::Error::other("disk full"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("run/segment/00001.json"));
    }
}
