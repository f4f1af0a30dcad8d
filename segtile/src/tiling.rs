//! Tile planning.
//!
//! The extent is cut into a grid of tile *cores* that partition it exactly.
//! Each tile's *window* is its core grown by `overlap` on every interior
//! edge (clamped to the extent), so two adjacent windows share a band of at
//! least `overlap` pixels across their common edge. Every output pixel is
//! owned by exactly one core.

use serde::{Deserialize, Serialize};

use crate::config::TilingConfig;
use crate::error::{Error, Result};
use crate::raster::Window;

/// One planned tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub index: usize,
    pub col: usize,
    pub row: usize,
    /// Pixels this tile owns in the final labeling.
    pub core: Window,
    /// Pixels this tile reads and segments (core plus overlap).
    pub window: Window,
}

impl Tile {
    /// The core expressed in the tile window's local coordinates.
    #[inline]
    pub fn core_in_window(&self) -> Window {
        self.core.relative_to(&self.window)
    }
}

/// Sides of a window that run through the raster rather than along its
/// border. A region touching one may continue outside the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutEdges {
    pub left: bool,
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
}

impl CutEdges {
    /// A window covering the whole raster.
    pub const NONE: Self = Self {
        left: false,
        top: false,
        right: false,
        bottom: false,
    };

    /// Cut sides of `window` inside a `width` x `height` extent.
    pub fn of(window: &Window, width: usize, height: usize) -> Self {
        Self {
            left: window.x > 0,
            top: window.y > 0,
            right: window.right() < width,
            bottom: window.bottom() < height,
        }
    }

    /// True when local pixel `(x, y)` of a `width` x `height` window lies
    /// on a cut side.
    #[inline]
    pub fn touches(&self, x: usize, y: usize, width: usize, height: usize) -> bool {
        (self.left && x == 0)
            || (self.top && y == 0)
            || (self.right && x + 1 == width)
            || (self.bottom && y + 1 == height)
    }
}

/// Which edge two tiles share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjacency {
    /// `b` is directly right of `a`.
    Horizontal,
    /// `b` is directly below `a`.
    Vertical,
}

/// Two edge-adjacent tiles, `a` always precedes `b` in tile order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePair {
    pub index: usize,
    pub a: usize,
    pub b: usize,
    pub adjacency: Adjacency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    width: usize,
    height: usize,
    overlap: usize,
    cols: usize,
    rows: usize,
    tiles: Vec<Tile>,
}

impl TileGrid {
    /// Plans tiles over a `width` x `height` extent.
    pub fn plan(width: usize, height: usize, config: &TilingConfig) -> Result<Self> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(Error::precondition(format!(
                "cannot tile an empty {width}x{height} raster"
            )));
        }

        let (tile_width, tile_height) = config.effective_tile_size()?;
        let overlap = config.overlap;
        let cols = width.div_ceil(tile_width);
        let rows = height.div_ceil(tile_height);

        let mut tiles = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let x = col * tile_width;
                let y = row * tile_height;
                let core = Window::new(
                    x,
                    y,
                    tile_width.min(width - x),
                    tile_height.min(height - y),
                );
                let wx = core.x.saturating_sub(overlap);
                let wy = core.y.saturating_sub(overlap);
                let window = Window::new(
                    wx,
                    wy,
                    (core.right() + overlap).min(width) - wx,
                    (core.bottom() + overlap).min(height) - wy,
                );
                tiles.push(Tile {
                    index: tiles.len(),
                    col,
                    row,
                    core,
                    window,
                });
            }
        }

        tracing::debug!(
            width,
            height,
            cols,
            rows,
            tile_width,
            tile_height,
            overlap,
            "Planned tile grid"
        );

        Ok(Self {
            width,
            height,
            overlap,
            cols,
            rows,
            tiles,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, index: usize) -> Result<&Tile> {
        self.tiles.get(index).ok_or_else(|| {
            Error::precondition(format!(
                "tile {index} does not exist in a grid of {} tiles",
                self.tiles.len()
            ))
        })
    }

    pub fn tile_at(&self, col: usize, row: usize) -> Option<&Tile> {
        (col < self.cols && row < self.rows).then(|| &self.tiles[row * self.cols + col])
    }

    /// All edge-adjacent pairs: horizontal pairs first, then vertical,
    /// each in row-major order.
    pub fn pairs(&self) -> Vec<TilePair> {
        let mut pairs = Vec::new();
        for row in 0..self.rows {
            for col in 0..self.cols.saturating_sub(1) {
                let a = row * self.cols + col;
                pairs.push(TilePair {
                    index: pairs.len(),
                    a,
                    b: a + 1,
                    adjacency: Adjacency::Horizontal,
                });
            }
        }
        for row in 0..self.rows.saturating_sub(1) {
            for col in 0..self.cols {
                let a = row * self.cols + col;
                pairs.push(TilePair {
                    index: pairs.len(),
                    a,
                    b: a + self.cols,
                    adjacency: Adjacency::Vertical,
                });
            }
        }
        pairs
    }

    /// Sides of the tile's window that cut through the raster.
    pub fn cut_edges(&self, tile: &Tile) -> CutEdges {
        CutEdges::of(&tile.window, self.width, self.height)
    }

    /// Pixels read by both tiles of a pair.
    pub fn overlap_band(&self, pair: &TilePair) -> Result<Window> {
        let a = self.tile(pair.a)?;
        let b = self.tile(pair.b)?;
        a.window.intersect(&b.window).ok_or_else(|| {
            Error::precondition(format!(
                "tiles {} and {} do not overlap",
                pair.a, pair.b
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tile_width: usize, tile_height: usize, overlap: usize) -> TilingConfig {
        TilingConfig {
            tile_width,
            tile_height,
            overlap,
            max_segment_diameter: overlap,
            max_tile_pixels: None,
        }
    }

    #[test]
    fn test_cores_partition_extent() {
        let grid = TileGrid::plan(103, 57, &config(20, 16, 3)).unwrap();
        assert_eq!(grid.cols(), 6);
        assert_eq!(grid.rows(), 4);

        let mut owner = vec![0u32; 103 * 57];
        for tile in grid.tiles() {
            assert!(tile.window.contains_window(&tile.core));
            for y in tile.core.y..tile.core.bottom() {
                for x in tile.core.x..tile.core.right() {
                    owner[y * 103 + x] += 1;
                }
            }
        }
        assert!(owner.iter().all(|&count| count == 1));
    }

    #[test]
    fn test_adjacent_windows_share_overlap_band() {
        let overlap = 4;
        let grid = TileGrid::plan(50, 50, &config(12, 12, overlap)).unwrap();
        for pair in grid.pairs() {
            let band = grid.overlap_band(&pair).unwrap();
            let across = match pair.adjacency {
                Adjacency::Horizontal => band.width,
                Adjacency::Vertical => band.height,
            };
            assert!(
                across >= overlap,
                "pair {pair:?} band {band} narrower than overlap"
            );
        }
    }

    #[test]
    fn test_two_row_strips() {
        // 10x10 raster split into two 10-wide strips of 5 core rows.
        let grid = TileGrid::plan(10, 10, &config(10, 5, 1)).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.tiles()[0].window, Window::new(0, 0, 10, 6));
        assert_eq!(grid.tiles()[1].window, Window::new(0, 4, 10, 6));
        assert_eq!(grid.tiles()[1].core_in_window(), Window::new(0, 1, 10, 5));

        let pairs = grid.pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].adjacency, Adjacency::Vertical);
        assert_eq!(grid.overlap_band(&pairs[0]).unwrap(), Window::new(0, 4, 10, 2));
    }

    #[test]
    fn test_single_tile_has_no_pairs() {
        let grid = TileGrid::plan(30, 20, &config(64, 64, 8)).unwrap();
        assert_eq!(grid.len(), 1);
        assert!(grid.pairs().is_empty());
        assert_eq!(grid.tiles()[0].window, Window::new(0, 0, 30, 20));
    }

    #[test]
    fn test_pair_indices_are_dense() {
        let grid = TileGrid::plan(40, 30, &config(10, 10, 2)).unwrap();
        let pairs = grid.pairs();
        // 4 cols x 3 rows: 3*3 horizontal + 4*2 vertical.
        assert_eq!(pairs.len(), 17);
        for (i, pair) in pairs.iter().enumerate() {
            assert_eq!(pair.index, i);
            assert!(pair.a < pair.b);
        }
    }

    #[test]
    fn test_empty_extent_rejected() {
        assert!(TileGrid::plan(0, 10, &config(10, 10, 1)).is_err());
    }

    #[test]
    fn test_invalid_overlap_rejected_before_planning() {
        let mut cfg = config(10, 10, 2);
        cfg.max_segment_diameter = 5;
        assert!(matches!(
            TileGrid::plan(100, 100, &cfg),
            Err(Error::Config { .. })
        ));
    }
}
