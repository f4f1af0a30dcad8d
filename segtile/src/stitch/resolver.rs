//! Global id resolution over stitch evidence.

use common::Buffer2;
use serde::{Deserialize, Serialize};

use super::{PairEvidence, SegmentNode};
use crate::error::{Error, Result};

/// Union-find over every local segment of every tile.
///
/// Nodes are numbered by `(tile, label)` order. Unions always keep the
/// smaller node as root, so the final components do not depend on the order
/// in which evidence is merged.
#[derive(Debug, Default)]
pub struct GlobalIdResolver {
    offsets: Vec<usize>,
    core_counts: Vec<u64>,
    parent: Vec<usize>,
}

impl GlobalIdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the next tile. Tiles must be added in index order.
    ///
    /// `core_counts[label - 1]` is the number of pixels of that label inside
    /// the tile's core.
    pub fn add_tile(&mut self, tile: usize, label_count: u32, core_counts: &[u64]) -> Result<()> {
        if tile != self.offsets.len() {
            return Err(Error::precondition(format!(
                "tile {tile} added out of order, expected tile {}",
                self.offsets.len()
            )));
        }
        if core_counts.len() != label_count as usize {
            return Err(Error::precondition(format!(
                "tile {tile} has {label_count} labels but {} core counts",
                core_counts.len()
            )));
        }
        let start = self.parent.len();
        self.offsets.push(start);
        self.core_counts.extend_from_slice(core_counts);
        self.parent.extend(start..start + label_count as usize);
        Ok(())
    }

    pub fn tile_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn node_count(&self) -> usize {
        self.parent.len()
    }

    fn labels_in(&self, tile: usize) -> usize {
        let end = self
            .offsets
            .get(tile + 1)
            .copied()
            .unwrap_or(self.parent.len());
        end - self.offsets[tile]
    }

    fn node_index(&self, node: SegmentNode) -> Result<usize> {
        if node.tile >= self.offsets.len() {
            return Err(Error::precondition(format!(
                "evidence names unknown tile {}",
                node.tile
            )));
        }
        if node.label == 0 || node.label as usize > self.labels_in(node.tile) {
            return Err(Error::precondition(format!(
                "evidence names label {} of tile {}, which has {} labels",
                node.label,
                node.tile,
                self.labels_in(node.tile)
            )));
        }
        Ok(self.offsets[node.tile] + node.label as usize - 1)
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while current != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }

    /// Joins every correspondence of one pair.
    pub fn merge_evidence(&mut self, evidence: &PairEvidence) -> Result<()> {
        for edge in &evidence.edges {
            let a = self.node_index(edge.a)?;
            let b = self.node_index(edge.b)?;
            self.union(a, b);
        }
        Ok(())
    }

    /// Mints global ids `1..=max_id` in ascending order of each component's
    /// smallest node. Components without any core pixel never reach the
    /// output and receive no id.
    pub fn resolve(mut self) -> GlobalIdMap {
        let n = self.parent.len();
        let mut component_core = vec![0u64; n];
        for node in 0..n {
            let root = self.find(node);
            component_core[root] += self.core_counts[node];
        }

        let mut root_id = vec![0u32; n];
        let mut next = 0u32;
        let mut ids = vec![0u32; n];
        for node in 0..n {
            let root = self.find(node);
            if component_core[root] == 0 {
                continue;
            }
            if root_id[root] == 0 {
                next += 1;
                root_id[root] = next;
            }
            ids[node] = root_id[root];
        }

        let tiles = (0..self.offsets.len())
            .map(|tile| {
                let start = self.offsets[tile];
                let mut table = Vec::with_capacity(self.labels_in(tile) + 1);
                table.push(0);
                table.extend_from_slice(&ids[start..start + self.labels_in(tile)]);
                table
            })
            .collect();

        tracing::info!(
            tiles = self.offsets.len(),
            local_segments = n,
            global_segments = next,
            "Resolved global segment ids"
        );

        GlobalIdMap {
            tiles,
            max_id: next,
        }
    }
}

/// Local label → global id, per tile. Label 0 always maps to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdMap {
    tiles: Vec<Vec<u32>>,
    max_id: u32,
}

impl GlobalIdMap {
    #[inline]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Global id of a local label; 0 for nodata or unknown labels.
    #[inline]
    pub fn global_id(&self, tile: usize, label: u32) -> u32 {
        self.tiles
            .get(tile)
            .and_then(|table| table.get(label as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn relabel(&self, tile: usize, labels: &Buffer2<u32>) -> Buffer2<u32> {
        labels.map(|&label| self.global_id(tile, label))
    }
}
