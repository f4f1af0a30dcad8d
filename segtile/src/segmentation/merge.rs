//! Region adjacency graph used for merging and small-segment elimination.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use common::Buffer2;

use crate::tiling::CutEdges;

/// Regions keyed by clump label `1..=n`. Slot 0 is unused.
#[derive(Debug)]
pub(crate) struct RegionGraph {
    bands: usize,
    size: Vec<u64>,
    sums: Vec<f64>,
    parent: Vec<u32>,
    version: Vec<u32>,
    neighbours: Vec<BTreeSet<u32>>,
    /// Region reaches a cut side of the window; its true extent is unknown.
    truncated: Vec<bool>,
    live: usize,
}

/// Merge candidate ordered so that [`BinaryHeap`] pops the smallest
/// distance first, then the lower label pair.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist: f64,
    a: u32,
    b: u32,
    version_a: u32,
    version_b: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

impl RegionGraph {
    /// Builds sizes, band sums and 4-neighbour adjacency from a clump grid.
    pub fn build(
        labels: &Buffer2<u32>,
        count: u32,
        bands: &[Buffer2<f64>],
        cut: CutEdges,
    ) -> Self {
        let n = count as usize + 1;
        let band_count = bands.len();
        let mut size = vec![0u64; n];
        let mut sums = vec![0.0f64; n * band_count];
        let mut neighbours = vec![BTreeSet::new(); n];
        let mut truncated = vec![false; n];

        let width = labels.width();
        let height = labels.height();
        for y in 0..height {
            let row = labels.row(y);
            for (x, &label) in row.iter().enumerate() {
                if label == 0 {
                    continue;
                }
                let l = label as usize;
                size[l] += 1;
                truncated[l] |= cut.touches(x, y, width, height);
                for (b, band) in bands.iter().enumerate() {
                    sums[l * band_count + b] += band[(x, y)];
                }

                if x + 1 < width {
                    let right = row[x + 1];
                    if right != 0 && right != label {
                        neighbours[l].insert(right);
                        neighbours[right as usize].insert(label);
                    }
                }
                if y + 1 < height {
                    let below = labels[(x, y + 1)];
                    if below != 0 && below != label {
                        neighbours[l].insert(below);
                        neighbours[below as usize].insert(label);
                    }
                }
            }
        }

        Self {
            bands: band_count,
            size,
            sums,
            parent: (0..n as u32).collect(),
            version: vec![0; n],
            neighbours,
            truncated,
            live: count as usize,
        }
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    fn is_root(&self, label: u32) -> bool {
        self.parent[label as usize] == label
    }

    fn find(&self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        root
    }

    /// Euclidean distance between the region means.
    fn distance(&self, a: u32, b: u32) -> f64 {
        let (a, b) = (a as usize, b as usize);
        let (na, nb) = (self.size[a] as f64, self.size[b] as f64);
        let sa = &self.sums[a * self.bands..(a + 1) * self.bands];
        let sb = &self.sums[b * self.bands..(b + 1) * self.bands];
        sa.iter()
            .zip(sb)
            .map(|(x, y)| {
                let d = x / na - y / nb;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }

    #[inline]
    fn is_truncated(&self, label: u32) -> bool {
        self.truncated[label as usize]
    }

    fn candidate(&self, a: u32, b: u32) -> Candidate {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        Candidate {
            dist: self.distance(a, b),
            a,
            b,
            version_a: self.version[a as usize],
            version_b: self.version[b as usize],
        }
    }

    /// Merges two live regions; the lower label survives. Returns it.
    fn merge(&mut self, a: u32, b: u32) -> u32 {
        let (root, other) = if a < b { (a, b) } else { (b, a) };
        let (r, o) = (root as usize, other as usize);

        self.size[r] += self.size[o];
        self.size[o] = 0;
        for band in 0..self.bands {
            self.sums[r * self.bands + band] += self.sums[o * self.bands + band];
        }

        let moved = std::mem::take(&mut self.neighbours[o]);
        for n in moved {
            self.neighbours[n as usize].remove(&other);
            if n != root {
                self.neighbours[n as usize].insert(root);
                self.neighbours[r].insert(n);
            }
        }
        self.neighbours[r].remove(&other);
        self.truncated[r] |= self.truncated[o];

        self.parent[o] = root;
        self.version[r] += 1;
        self.version[o] += 1;
        self.live -= 1;
        root
    }

    /// Repeatedly merges the closest adjacent pair while its distance is
    /// within `threshold` and more than `target` regions remain. Truncated
    /// regions take no part. Does nothing when neither limit is set.
    pub fn merge_similar(&mut self, threshold: Option<f64>, target: Option<usize>) {
        if threshold.is_none() && target.is_none() {
            return;
        }
        let target = target.unwrap_or(0);

        let mut heap = BinaryHeap::new();
        for a in 1..self.parent.len() as u32 {
            if self.is_truncated(a) {
                continue;
            }
            for &b in self.neighbours[a as usize].range(a + 1..) {
                if !self.is_truncated(b) {
                    heap.push(self.candidate(a, b));
                }
            }
        }

        while self.live > target {
            let Some(candidate) = heap.pop() else {
                break;
            };
            let stale = !self.is_root(candidate.a)
                || !self.is_root(candidate.b)
                || self.version[candidate.a as usize] != candidate.version_a
                || self.version[candidate.b as usize] != candidate.version_b;
            if stale {
                continue;
            }
            if threshold.is_some_and(|t| candidate.dist > t) {
                break;
            }

            let root = self.merge(candidate.a, candidate.b);
            let around: Vec<u32> = self.neighbours[root as usize].iter().copied().collect();
            for n in around.into_iter().filter(|&n| !self.is_truncated(n)) {
                heap.push(self.candidate(root, n));
            }
        }
    }

    /// Merges regions smaller than `min_size` into their spectrally closest
    /// neighbour, processing sizes `1..min_size` in ascending order. Regions
    /// without neighbours and truncated regions are left as they are; a
    /// truncated region may still absorb a small neighbour.
    pub fn eliminate_small(&mut self, min_size: usize) {
        for s in 1..min_size as u64 {
            for label in 1..self.parent.len() as u32 {
                if !self.is_root(label)
                    || self.size[label as usize] != s
                    || self.is_truncated(label)
                {
                    continue;
                }
                let closest = self.neighbours[label as usize]
                    .iter()
                    .map(|&n| (self.distance(label, n), n))
                    .min_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
                if let Some((_, n)) = closest {
                    self.merge(label, n);
                }
            }
        }
    }

    /// Rewrites the grid to the surviving regions, numbered `1..=m` by
    /// first pixel in scan order. Returns `m`.
    pub fn relabel(&self, labels: &mut Buffer2<u32>) -> u32 {
        let mut map = vec![0u32; self.parent.len()];
        let mut next = 0u32;
        for l in labels.pixels_mut().iter_mut().filter(|l| **l != 0) {
            let root = self.find(*l) as usize;
            if map[root] == 0 {
                next += 1;
                map[root] = next;
            }
            *l = map[root];
        }
        next
    }

    #[cfg(test)]
    pub fn size_of(&self, label: u32) -> u64 {
        self.size[self.find(label) as usize]
    }
}
