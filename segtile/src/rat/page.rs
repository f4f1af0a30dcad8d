//! Fixed-size pages of table rows.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type PageId = u32;

/// Page `k` covers ids `k * page_size ..= (k + 1) * page_size - 1`,
/// clipped to `1..=max_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    id: PageId,
    start: u32,
    rows: Vec<R>,
    populated: Vec<bool>,
    complete: bool,
}

impl<R: Default + Clone> Page<R> {
    fn new(id: PageId, start: u32, end: u32) -> Self {
        let len = (end - start + 1) as usize;
        Self {
            id,
            start,
            rows: vec![R::default(); len],
            populated: vec![false; len],
            complete: false,
        }
    }
}

impl<R> Page<R> {
    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.rows.len() as u32 - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        id >= self.start && id <= self.end()
    }

    pub fn row(&self, id: u32) -> Option<&R> {
        if !self.contains(id) {
            return None;
        }
        self.rows.get((id - self.start) as usize)
    }

    /// Mutable access to a row, marking it populated.
    pub fn row_mut(&mut self, id: u32) -> Option<&mut R> {
        if !self.contains(id) {
            return None;
        }
        let idx = (id - self.start) as usize;
        self.populated[idx] = true;
        self.rows.get_mut(idx)
    }

    pub fn is_populated(&self, id: u32) -> bool {
        self.contains(id) && self.populated[(id - self.start) as usize]
    }

    /// Rows in id order.
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn missing(&self) -> Vec<u32> {
        self.populated
            .iter()
            .enumerate()
            .filter(|(_, populated)| !**populated)
            .map(|(i, _)| self.start + i as u32)
            .collect()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fails naming the rows that were never populated.
    pub fn mark_complete(&mut self) -> Result<()> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::RowsNotPopulated {
                page: self.id,
                start: self.start,
                end: self.end(),
                missing,
            });
        }
        self.complete = true;
        Ok(())
    }

    pub fn summary(&self) -> PageSummary {
        let missing = self.missing();
        PageSummary {
            page: self.id,
            start: self.start,
            end: self.end(),
            incomplete_rows: missing.len() as u32,
            first_missing: missing.first().copied(),
        }
    }
}

/// Where an incomplete page sits, for error reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: PageId,
    pub start: u32,
    pub end: u32,
    pub incomplete_rows: u32,
    pub first_missing: Option<u32>,
}

impl PageSummary {
    pub fn join(pages: &[PageSummary]) -> String {
        pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for PageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} (ids {}..={}) has {} incomplete row(s)",
            self.page, self.start, self.end, self.incomplete_rows
        )?;
        if let Some(id) = self.first_missing {
            write!(f, ", first {id}")?;
        }
        Ok(())
    }
}

/// Pages keyed by [`PageId`], created on demand.
#[derive(Debug, Clone)]
pub struct PageArena<R> {
    page_size: u32,
    max_id: u32,
    pages: BTreeMap<PageId, Page<R>>,
}

impl<R: Default + Clone> PageArena<R> {
    pub fn new(page_size: u32, max_id: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::config("page_size", "must be at least 1"));
        }
        Ok(Self {
            page_size,
            max_id,
            pages: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Number of page slots needed to cover `1..=max_id`.
    pub fn slot_count(&self) -> u32 {
        if self.max_id == 0 {
            0
        } else {
            self.max_id / self.page_size + 1
        }
    }

    /// Ids covered by slot `page`, `None` if the slot holds no valid id.
    pub fn slot_range(&self, page: PageId) -> Option<RangeInclusive<u32>> {
        let first = (page as u64 * self.page_size as u64).max(1);
        let last = ((page as u64 + 1) * self.page_size as u64 - 1).min(self.max_id as u64);
        (first <= last).then(|| first as u32..=last as u32)
    }

    pub fn page_for(&self, id: u32) -> Result<PageId> {
        if id == 0 || id > self.max_id {
            return Err(Error::IdOutOfRange {
                id,
                max_id: self.max_id,
            });
        }
        Ok(id / self.page_size)
    }

    /// Creates the page holding `ids`, which must fall in a single slot.
    pub fn create_page(&mut self, ids: RangeInclusive<u32>) -> Result<PageId> {
        let (start, end) = (*ids.start(), *ids.end());
        let page = self.page_for(start)?;
        if self.page_for(end)? != page || end < start {
            return Err(Error::precondition(format!(
                "ids {start}..={end} do not fit in one page of {} rows",
                self.page_size
            )));
        }
        self.create_slot(page)
    }

    /// Creates the page for slot `page` covering its full id range.
    pub fn create_slot(&mut self, page: PageId) -> Result<PageId> {
        let range = self.slot_range(page).ok_or(Error::IdOutOfRange {
            id: page.saturating_mul(self.page_size),
            max_id: self.max_id,
        })?;
        if self.pages.contains_key(&page) {
            return Err(Error::PageOverlap {
                page,
                start: *range.start(),
                end: *range.end(),
            });
        }
        let (start, end) = range.into_inner();
        self.pages.insert(page, Page::new(page, start, end));
        Ok(page)
    }

    /// The page holding `id`, created if absent.
    pub fn page_for_id_mut(&mut self, id: u32) -> Result<&mut Page<R>> {
        let page = self.page_for(id)?;
        if !self.pages.contains_key(&page) {
            self.create_slot(page)?;
        }
        self.pages.get_mut(&page).ok_or(Error::UnknownPage { id })
    }

    /// Mutable row access; the page must already exist.
    pub fn row_mut(&mut self, id: u32) -> Result<&mut R> {
        let page = self.page_for(id)?;
        self.pages
            .get_mut(&page)
            .and_then(|p| p.row_mut(id))
            .ok_or(Error::UnknownPage { id })
    }

    pub fn page(&self, page: PageId) -> Option<&Page<R>> {
        self.pages.get(&page)
    }

    pub fn page_mut(&mut self, page: PageId) -> Option<&mut Page<R>> {
        self.pages.get_mut(&page)
    }

    pub fn remove(&mut self, page: PageId) -> Option<Page<R>> {
        self.pages.remove(&page)
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn pages(&self) -> impl Iterator<Item = &Page<R>> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
