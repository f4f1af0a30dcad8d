//! Clumping: connected components of equal spectral class.
//!
//! Run-length based labeling with a sequential union-find. Rows are scanned
//! into runs of one class; a run joins every run of the same class in the
//! previous row that it touches (4-connectivity). Labels are flattened to
//! `1..=n` in order of each component's first pixel in scan order, so the
//! output depends only on the class grid.

use common::Buffer2;

/// Class value meaning "no data"; never clumped.
pub const NO_CLASS: u32 = 0;

/// A horizontal run of one class.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32, // inclusive
    end: u32,   // exclusive
    class: u32,
    label: u32,
}

#[inline]
fn runs_touch(prev: &Run, curr: &Run) -> bool {
    prev.class == curr.class && prev.start < curr.end && prev.end > curr.start
}

fn extract_runs(row: &[u32], runs: &mut Vec<Run>) {
    let mut x = 0;
    while x < row.len() {
        let class = row[x];
        let start = x;
        while x < row.len() && row[x] == class {
            x += 1;
        }
        if class != NO_CLASS {
            runs.push(Run {
                start: start as u32,
                end: x as u32,
                class,
                label: 0,
            });
        }
    }
}

/// Links each run in `curr` to touching runs in `prev`, creating new
/// labels for runs without a match.
fn merge_runs_with_prev(curr: &mut [Run], prev: &[Run], uf: &mut UnionFind) {
    let mut prev_idx = 0;
    for run in curr.iter_mut() {
        while prev_idx < prev.len() && prev[prev_idx].end <= run.start {
            prev_idx += 1;
        }

        let mut assigned = None;
        let mut check = prev_idx;
        while check < prev.len() && prev[check].start < run.end {
            let candidate = &prev[check];
            if runs_touch(candidate, run) {
                match assigned {
                    Some(label) if label != candidate.label => uf.union(label, candidate.label),
                    None => assigned = Some(candidate.label),
                    _ => {}
                }
            }
            check += 1;
        }

        run.label = assigned.unwrap_or_else(|| uf.make_set());
    }
}

/// Labels connected regions of equal class. Returns the label grid
/// (0 where the class is [`NO_CLASS`]) and the number of regions.
pub fn clump(classes: &Buffer2<u32>) -> (Buffer2<u32>, u32) {
    let width = classes.width();
    let mut labels = Buffer2::new_filled(width, classes.height(), 0u32);
    let mut uf = UnionFind::new();
    let mut prev_runs: Vec<Run> = Vec::with_capacity(width / 4 + 1);
    let mut curr_runs: Vec<Run> = Vec::with_capacity(width / 4 + 1);

    for y in 0..classes.height() {
        curr_runs.clear();
        extract_runs(classes.row(y), &mut curr_runs);
        merge_runs_with_prev(&mut curr_runs, &prev_runs, &mut uf);

        let out = labels.row_mut(y);
        for run in &curr_runs {
            out[run.start as usize..run.end as usize].fill(run.label);
        }

        std::mem::swap(&mut prev_runs, &mut curr_runs);
    }

    let count = uf.flatten_labels(labels.pixels_mut());
    (labels, count)
}

// ============================================================================
// Union-Find
// ============================================================================

/// Union-find over labels `1..`; the smaller label always becomes the root.
#[derive(Debug)]
struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::with_capacity(256),
        }
    }

    #[inline]
    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32 + 1;
        self.parent.push(label);
        label
    }

    /// Find root with two-pass path compression.
    fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        loop {
            let parent = self.parent[(root - 1) as usize];
            if parent == root {
                break;
            }
            root = parent;
        }

        let mut current = label;
        while current != root {
            let idx = (current - 1) as usize;
            let parent = self.parent[idx];
            self.parent[idx] = root;
            current = parent;
        }

        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Rewrites provisional labels to `1..=n` and returns `n`.
    ///
    /// Provisional labels are created in scan order and roots are the
    /// smallest label of their set, so numbering roots in ascending order
    /// numbers components by their first pixel.
    fn flatten_labels(&mut self, labels: &mut [u32]) -> u32 {
        let len = self.parent.len();
        let mut label_map = vec![0u32; len + 1];
        let mut count = 0u32;

        for i in 1..=len as u32 {
            let root = self.find(i);
            if label_map[root as usize] == 0 {
                count += 1;
                label_map[root as usize] = count;
            }
            label_map[i as usize] = label_map[root as usize];
        }

        for l in labels.iter_mut().filter(|l| **l != 0) {
            *l = label_map[*l as usize];
        }

        count
    }
}
