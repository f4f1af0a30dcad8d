//! Cross-tile identity reconciliation.
//!
//! Adjacent tiles segment the same overlap band independently. A pair's
//! evidence links a local segment on one side to the local segment on the
//! other side that covers most of its band pixels. The resolver joins all
//! evidence transitively and mints dense global ids.

mod resolver;


use std::collections::BTreeSet;

use common::Buffer2;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::StitchConfig;
use crate::error::{Error, Result};
use crate::raster::Window;
use crate::tiling::{TileGrid, TilePair};

pub use resolver::{GlobalIdMap, GlobalIdResolver};

/// A local segment: label `label` (>= 1) of tile `tile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentNode {
    pub tile: usize,
    pub label: u32,
}

impl SegmentNode {
    pub const fn new(tile: usize, label: u32) -> Self {
        Self { tile, label }
    }
}

/// Two local segments judged to be the same global segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correspondence {
    pub a: SegmentNode,
    pub b: SegmentNode,
    /// Band pixels carrying both labels.
    pub shared: u64,
}

/// Stitch result for one tile pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEvidence {
    pub pair: usize,
    pub tile_a: usize,
    pub tile_b: usize,
    pub band: Window,
    /// Sorted by `(a, b)`.
    pub edges: Vec<Correspondence>,
}

/// Pixels per label inside `core`, indexed by `label - 1`.
pub fn core_label_counts(labels: &Buffer2<u32>, core: Window, label_count: u32) -> Vec<u64> {
    let mut counts = vec![0u64; label_count as usize];
    for y in core.y..core.bottom() {
        for &label in &labels.row(y)[core.x..core.right()] {
            if label != 0 {
                if let Some(count) = counts.get_mut(label as usize - 1) {
                    *count += 1;
                }
            }
        }
    }
    counts
}

/// Compares the overlap band of two segmented tile windows.
///
/// A label is linked only when it shares strictly more than
/// `min_shared_fraction` of its band pixels with the partner label.
///
/// `labels_a` / `labels_b` cover the full windows of `pair.a` / `pair.b`.
pub fn stitch_pair(
    grid: &TileGrid,
    pair: &TilePair,
    labels_a: &Buffer2<u32>,
    labels_b: &Buffer2<u32>,
    config: &StitchConfig,
) -> Result<PairEvidence> {
    let tile_a = grid.tile(pair.a)?;
    let tile_b = grid.tile(pair.b)?;
    for (tile, labels) in [(tile_a, labels_a), (tile_b, labels_b)] {
        if labels.width() != tile.window.width || labels.height() != tile.window.height {
            return Err(Error::precondition(format!(
                "labels of tile {} are {}x{}, window is {}",
                tile.index,
                labels.width(),
                labels.height(),
                tile.window
            )));
        }
    }

    let band = grid.overlap_band(pair)?;
    let in_a = band.relative_to(&tile_a.window);
    let in_b = band.relative_to(&tile_b.window);

    let mut shared: HashMap<(u32, u32), u64> = HashMap::new();
    let mut band_a: HashMap<u32, u64> = HashMap::new();
    let mut band_b: HashMap<u32, u64> = HashMap::new();
    for dy in 0..band.height {
        let row_a = &labels_a.row(in_a.y + dy)[in_a.x..in_a.right()];
        let row_b = &labels_b.row(in_b.y + dy)[in_b.x..in_b.right()];
        for (&la, &lb) in row_a.iter().zip(row_b) {
            if la != 0 {
                *band_a.entry(la).or_default() += 1;
            }
            if lb != 0 {
                *band_b.entry(lb).or_default() += 1;
            }
            if la != 0 && lb != 0 {
                *shared.entry((la, lb)).or_default() += 1;
            }
        }
    }

    // Best partner per label on each side; larger overlap wins, ties go to
    // the lower label.
    let mut best_a: HashMap<u32, (u64, u32)> = HashMap::new();
    let mut best_b: HashMap<u32, (u64, u32)> = HashMap::new();
    let fraction = config.min_shared_fraction;
    for (&(la, lb), &n) in &shared {
        if n as f64 > fraction * band_a[&la] as f64 {
            keep_best(&mut best_a, la, n, lb);
        }
        if n as f64 > fraction * band_b[&lb] as f64 {
            keep_best(&mut best_b, lb, n, la);
        }
    }

    let selected: BTreeSet<(u32, u32)> = best_a
        .iter()
        .map(|(&la, &(_, lb))| (la, lb))
        .chain(best_b.iter().map(|(&lb, &(_, la))| (la, lb)))
        .collect();

    let edges: Vec<Correspondence> = selected
        .into_iter()
        .map(|(la, lb)| Correspondence {
            a: SegmentNode::new(pair.a, la),
            b: SegmentNode::new(pair.b, lb),
            shared: shared[&(la, lb)],
        })
        .collect();

    tracing::debug!(
        pair = pair.index,
        tile_a = pair.a,
        tile_b = pair.b,
        band = %band,
        edges = edges.len(),
        "Stitched tile pair"
    );

    Ok(PairEvidence {
        pair: pair.index,
        tile_a: pair.a,
        tile_b: pair.b,
        band,
        edges,
    })
}

fn keep_best(best: &mut HashMap<u32, (u64, u32)>, label: u32, shared: u64, other: u32) {
    best.entry(label)
        .and_modify(|current| {
            if shared > current.0 || (shared == current.0 && other < current.1) {
                *current = (shared, other);
            }
        })
        .or_insert((shared, other));
}
