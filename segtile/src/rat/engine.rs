//! Paged histogram builder.

use std::ops::RangeInclusive;

use super::{
    ColumnType, ColumnUsage, ColumnValues, PageArena, PageId, PageSummary, RasterAttributeTable,
    HISTOGRAM_COLUMN,
};
use crate::error::{Error, Result};

/// Accumulates pixel counts per global id in pages, then writes them as
/// the table's histogram column.
///
/// Pages must be created before rows in them are updated and marked
/// complete before [`RatEngine::finalize`]. A page can only be marked
/// complete once every id it covers has received at least one update.
#[derive(Debug, Clone)]
pub struct RatEngine {
    arena: PageArena<f64>,
}

impl RatEngine {
    pub fn new(page_size: u32, max_id: u32) -> Result<Self> {
        Ok(Self {
            arena: PageArena::new(page_size, max_id)?,
        })
    }

    #[inline]
    pub fn max_id(&self) -> u32 {
        self.arena.max_id()
    }

    pub fn page_for(&self, id: u32) -> Result<PageId> {
        self.arena.page_for(id)
    }

    pub fn create_page(&mut self, ids: RangeInclusive<u32>) -> Result<PageId> {
        self.arena.create_page(ids)
    }

    /// Creates one page per slot covering `1..=max_id`.
    pub fn create_all_pages(&mut self) -> Result<()> {
        for page in 0..self.arena.slot_count() {
            if self.arena.slot_range(page).is_some() && !self.arena.contains(page) {
                self.arena.create_slot(page)?;
            }
        }
        Ok(())
    }

    /// Adds `increment` to the row of `id`.
    pub fn upsert_row(&mut self, id: u32, increment: f64) -> Result<()> {
        *self.arena.row_mut(id)? += increment;
        Ok(())
    }

    pub fn mark_page_complete(&mut self, page: PageId) -> Result<()> {
        let start = page.saturating_mul(self.arena.page_size());
        self.arena
            .page_mut(page)
            .ok_or(Error::UnknownPage { id: start })?
            .mark_complete()
    }

    /// Marks every allocated page complete, stopping at the first failure.
    pub fn mark_all_complete(&mut self) -> Result<()> {
        let pages: Vec<PageId> = self.arena.pages().map(|p| p.id()).collect();
        pages
            .into_iter()
            .try_for_each(|page| self.mark_page_complete(page))
    }

    /// Pages that are allocated but not complete, plus slots that were never
    /// allocated at all.
    pub fn incomplete_pages(&self) -> Vec<PageSummary> {
        let mut incomplete = Vec::new();
        for page in 0..self.arena.slot_count() {
            let Some(range) = self.arena.slot_range(page) else {
                continue;
            };
            match self.arena.page(page) {
                Some(p) if p.is_complete() => {}
                Some(p) => incomplete.push(p.summary()),
                None => incomplete.push(PageSummary {
                    page,
                    start: *range.start(),
                    end: *range.end(),
                    incomplete_rows: range.end() - range.start() + 1,
                    first_missing: Some(*range.start()),
                }),
            }
        }
        incomplete
    }

    /// Writes the histogram column (`max_id + 1` rows, row 0 = 0).
    ///
    /// Leaves `rat` untouched if any page is incomplete.
    pub fn finalize(&self, rat: &mut RasterAttributeTable) -> Result<()> {
        let incomplete = self.incomplete_pages();
        if !incomplete.is_empty() {
            tracing::error!(
                pages = incomplete.len(),
                first = %incomplete[0],
                "Refusing to write histogram with incomplete pages"
            );
            return Err(Error::IncompletePages { pages: incomplete });
        }

        let mut histogram = Vec::with_capacity(self.arena.max_id() as usize + 1);
        histogram.push(0.0);
        for page in self.arena.pages() {
            histogram.extend_from_slice(page.rows());
        }

        rat.ensure_column(HISTOGRAM_COLUMN, ColumnType::Real, ColumnUsage::PixelCount)?;
        rat.set_row_count(histogram.len());
        rat.set_values(HISTOGRAM_COLUMN, 0, ColumnValues::Real(histogram))?;
        tracing::debug!(rows = rat.row_count(), "Wrote histogram column");
        Ok(())
    }
}
