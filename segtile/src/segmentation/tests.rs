use common::Buffer2;

use super::clump::clump;
use super::merge::RegionGraph;
use super::*;
use crate::tiling::CutEdges;

fn config(min_segment_size: usize) -> SegmentationConfig {
    SegmentationConfig {
        min_segment_size,
        ..Default::default()
    }
}

fn plane(width: usize, height: usize, values: &[f64]) -> Buffer2<f64> {
    Buffer2::new(width, height, values.to_vec())
}

fn bands(pixels: &Buffer2<f64>) -> &[Buffer2<f64>] {
    std::slice::from_ref(pixels)
}

/// Segments a window that covers the whole raster.
fn segment_whole(
    pixels: &Buffer2<f64>,
    nodata: Option<f64>,
    clusters: &SpectralClusters,
    config: &SegmentationConfig,
) -> Result<TileSegmentation> {
    segment_tile(bands(pixels), nodata, clusters, config, CutEdges::NONE)
}

/// Region graph of a window that covers the whole raster.
fn region_graph(labels: &Buffer2<u32>, count: u32, values: &Buffer2<f64>) -> RegionGraph {
    RegionGraph::build(labels, count, bands(values), CutEdges::NONE)
}

fn two_blocks() -> Buffer2<f64> {
    let mut pixels = Vec::with_capacity(100);
    for _ in 0..10 {
        pixels.extend([10.0; 5]);
        pixels.extend([200.0; 5]);
    }
    Buffer2::new(10, 10, pixels)
}

// ============================================================================
// Clumping
// ============================================================================

#[test]
fn test_clump_four_connectivity() {
    // Diagonal neighbours of the same class are separate regions.
    #[rustfmt::skip]
    let classes = Buffer2::new(3, 3, vec![
        1, 0, 1,
        0, 1, 0,
        1, 0, 1,
    ]);
    let (labels, count) = clump(&classes);
    assert_eq!(count, 5);
    assert_eq!(labels.pixels(), &[1, 0, 2, 0, 3, 0, 4, 0, 5]);
}

#[test]
fn test_clump_u_shape_merges_and_keeps_scan_order() {
    // Two arms that join on the last row become one region whose label is
    // the one of its first pixel.
    #[rustfmt::skip]
    let classes = Buffer2::new(4, 3, vec![
        1, 2, 2, 1,
        1, 2, 2, 1,
        1, 1, 1, 1,
    ]);
    let (labels, count) = clump(&classes);
    assert_eq!(count, 2);
    #[rustfmt::skip]
    assert_eq!(labels.pixels(), &[
        1, 2, 2, 1,
        1, 2, 2, 1,
        1, 1, 1, 1,
    ]);
}

#[test]
fn test_clump_different_classes_do_not_join() {
    let classes = Buffer2::new(4, 1, vec![1, 1, 2, 2]);
    let (labels, count) = clump(&classes);
    assert_eq!(count, 2);
    assert_eq!(labels.pixels(), &[1, 1, 2, 2]);
}

// ============================================================================
// Region graph
// ============================================================================

#[test]
fn test_merge_similar_threshold() {
    let values = plane(3, 1, &[10.0, 11.0, 50.0]);
    let labels = Buffer2::new(3, 1, vec![1, 2, 3]);
    let mut graph = region_graph(&labels, 3, &values);

    graph.merge_similar(Some(2.0), None);
    assert_eq!(graph.live(), 2);
    assert_eq!(graph.size_of(2), 2);
}

#[test]
fn test_merge_similar_target_count() {
    let values = plane(3, 1, &[0.0, 10.0, 100.0]);
    let labels = Buffer2::new(3, 1, vec![1, 2, 3]);
    let mut graph = region_graph(&labels, 3, &values);

    graph.merge_similar(None, Some(2));
    assert_eq!(graph.live(), 2);

    let mut relabelled = labels.clone();
    assert_eq!(graph.relabel(&mut relabelled), 2);
    assert_eq!(relabelled.pixels(), &[1, 1, 2]);
}

#[test]
fn test_merge_without_limits_is_noop() {
    let values = plane(2, 1, &[0.0, 0.0]);
    let labels = Buffer2::new(2, 1, vec![1, 2]);
    let mut graph = region_graph(&labels, 2, &values);
    graph.merge_similar(None, None);
    assert_eq!(graph.live(), 2);
}

#[test]
fn test_eliminate_small_picks_closest_neighbour() {
    // The middle pixel is closer to the right region.
    let values = plane(5, 1, &[0.0, 0.0, 7.0, 10.0, 10.0]);
    let labels = Buffer2::new(5, 1, vec![1, 1, 2, 3, 3]);
    let mut graph = region_graph(&labels, 3, &values);

    graph.eliminate_small(2);
    let mut relabelled = labels.clone();
    assert_eq!(graph.relabel(&mut relabelled), 2);
    assert_eq!(relabelled.pixels(), &[1, 1, 2, 2, 2]);
}

#[test]
fn test_eliminate_small_tie_goes_to_lower_label() {
    let values = plane(5, 1, &[0.0, 0.0, 5.0, 10.0, 10.0]);
    let labels = Buffer2::new(5, 1, vec![1, 1, 2, 3, 3]);
    let mut graph = region_graph(&labels, 3, &values);

    graph.eliminate_small(2);
    let mut relabelled = labels.clone();
    assert_eq!(graph.relabel(&mut relabelled), 2);
    assert_eq!(relabelled.pixels(), &[1, 1, 1, 2, 2]);
}

#[test]
fn test_eliminate_small_cascades_in_label_order() {
    let values = plane(3, 1, &[0.0, 5.0, 10.0]);
    let labels = Buffer2::new(3, 1, vec![1, 2, 3]);
    let mut graph = region_graph(&labels, 3, &values);

    // Region 1 joins region 2 first; region 3 then only touches the union.
    graph.eliminate_small(2);
    let mut relabelled = labels.clone();
    graph.relabel(&mut relabelled);
    assert_eq!(relabelled.pixels(), &[1, 1, 1]);
}

#[test]
fn test_isolated_small_region_survives() {
    let values = plane(3, 1, &[5.0, -1.0, 5.0]);
    let labels = Buffer2::new(3, 1, vec![1, 0, 2]);
    let mut graph = region_graph(&labels, 2, &values);

    graph.eliminate_small(10);
    assert_eq!(graph.live(), 2);
}

#[test]
fn test_truncated_region_is_not_eliminated() {
    let values = plane(4, 1, &[0.0, 0.0, 0.0, 9.0]);
    let labels = Buffer2::new(4, 1, vec![1, 1, 1, 2]);
    let right = CutEdges {
        right: true,
        ..CutEdges::NONE
    };

    let mut whole = region_graph(&labels, 2, &values);
    whole.eliminate_small(2);
    assert_eq!(whole.live(), 1);

    // Region 2 may continue past the window's right side.
    let mut cut = RegionGraph::build(&labels, 2, bands(&values), right);
    cut.eliminate_small(2);
    assert_eq!(cut.live(), 2);
}

#[test]
fn test_small_region_may_join_truncated_neighbour() {
    let values = plane(3, 1, &[5.0, 9.0, 9.0]);
    let labels = Buffer2::new(3, 1, vec![1, 2, 2]);
    let right = CutEdges {
        right: true,
        ..CutEdges::NONE
    };
    let mut graph = RegionGraph::build(&labels, 2, bands(&values), right);

    graph.eliminate_small(2);
    assert_eq!(graph.live(), 1);
    assert_eq!(graph.size_of(1), 3);
}

#[test]
fn test_truncated_region_is_not_merged() {
    let values = plane(3, 1, &[10.0, 11.0, 50.0]);
    let labels = Buffer2::new(3, 1, vec![1, 2, 3]);
    let left = CutEdges {
        left: true,
        ..CutEdges::NONE
    };
    let mut graph = RegionGraph::build(&labels, 3, bands(&values), left);

    graph.merge_similar(Some(2.0), None);
    assert_eq!(graph.live(), 3);
}

#[test]
fn test_cut_edges_of_window() {
    let window = crate::raster::Window::new(4, 0, 8, 4);
    let cut = CutEdges::of(&window, 16, 4);
    assert_eq!(
        cut,
        CutEdges {
            left: true,
            top: false,
            right: true,
            bottom: false,
        }
    );
    assert!(cut.touches(0, 1, 8, 4));
    assert!(cut.touches(7, 2, 8, 4));
    assert!(!cut.touches(3, 0, 8, 4));
    assert!(!cut.touches(3, 3, 8, 4));
}

// ============================================================================
// Tile segmentation
// ============================================================================

#[test]
fn test_segment_tile_two_blocks() {
    let pixels = two_blocks();
    let clusters = fit_kmeans(pixels.pixels(), 1, &config(1)).unwrap();
    assert_eq!(clusters.len(), 2);

    let seg = segment_whole(&pixels, Some(0.0), &clusters, &config(50)).unwrap();
    assert_eq!(seg.num_segments, 2);
    assert_eq!(seg.labels[(0, 0)], 1);
    assert_eq!(seg.labels[(9, 9)], 2);
    assert_eq!(seg.labels.pixels().iter().filter(|&&l| l == 1).count(), 50);
}

#[test]
fn test_segment_tile_nodata_is_zero() {
    let pixels = plane(4, 1, &[0.0, 3.0, 3.0, 0.0]);
    let clusters = SpectralClusters::new(1, vec![3.0]).unwrap();

    let seg = segment_whole(&pixels, Some(0.0), &clusters, &config(1)).unwrap();
    assert_eq!(seg.labels.pixels(), &[0, 1, 1, 0]);
    assert_eq!(seg.num_segments, 1);
}

#[test]
fn test_segment_tile_absorbs_speckle() {
    let mut pixels = two_blocks();
    pixels[(2, 2)] = 200.0;
    let clusters = SpectralClusters::new(1, vec![10.0, 200.0]).unwrap();

    let speckled = segment_whole(&pixels, None, &clusters, &config(1)).unwrap();
    assert_eq!(speckled.num_segments, 3);

    let cleaned = segment_whole(&pixels, None, &clusters, &config(2)).unwrap();
    assert_eq!(cleaned.num_segments, 2);
    assert_eq!(cleaned.labels[(2, 2)], cleaned.labels[(0, 0)]);
}

#[test]
fn test_segment_tile_keeps_speck_on_cut_side() {
    let pixels = plane(4, 1, &[10.0, 10.0, 10.0, 200.0]);
    let clusters = SpectralClusters::new(1, vec![10.0, 200.0]).unwrap();

    let whole = segment_whole(&pixels, None, &clusters, &config(2)).unwrap();
    assert_eq!(whole.num_segments, 1);

    let right = CutEdges {
        right: true,
        ..CutEdges::NONE
    };
    let cut = segment_tile(bands(&pixels), None, &clusters, &config(2), right).unwrap();
    assert_eq!(cut.num_segments, 2);
    assert_eq!(cut.labels.pixels(), &[1, 1, 1, 2]);
}

#[test]
fn test_segment_tile_is_deterministic() {
    let pixels = Buffer2::new(
        16,
        16,
        (0..256).map(|i| ((i * 37) % 11) as f64).collect(),
    );
    let cfg = SegmentationConfig {
        num_clusters: 3,
        min_segment_size: 4,
        ..Default::default()
    };
    let clusters = fit_kmeans(pixels.pixels(), 1, &cfg).unwrap();

    let a = segment_whole(&pixels, None, &clusters, &cfg).unwrap();
    let b = segment_whole(&pixels, None, &clusters, &cfg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_segment_tile_band_mismatch() {
    let pixels = plane(2, 1, &[1.0, 2.0]);
    let clusters = SpectralClusters::new(2, vec![1.0, 2.0]).unwrap();
    let err = segment_whole(&pixels, None, &clusters, &config(1)).unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }));
}

// ============================================================================
// Clusters
// ============================================================================

#[test]
fn test_kmeans_distinct_values_become_sorted_centres() {
    let samples = [5.0, 1.0, 5.0, 3.0, 1.0];
    let clusters = fit_kmeans(&samples, 1, &config(1)).unwrap();
    assert_eq!(clusters.len(), 3);
    assert_eq!(clusters.centre(0), &[1.0]);
    assert_eq!(clusters.centre(2), &[5.0]);
}

#[test]
fn test_kmeans_seeded_runs_match() {
    let samples: Vec<f64> = (0..400).map(|i| ((i * 7919) % 97) as f64).collect();
    let cfg = SegmentationConfig {
        num_clusters: 4,
        seed: 42,
        ..Default::default()
    };
    let a = fit_kmeans(&samples, 2, &cfg).unwrap();
    let b = fit_kmeans(&samples, 2, &cfg).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4);
}

#[test]
fn test_nearest_tie_goes_to_lower_index() {
    let clusters = SpectralClusters::new(1, vec![0.0, 2.0]).unwrap();
    assert_eq!(clusters.nearest(&[1.0]), 0);
    assert_eq!(clusters.nearest(&[1.5]), 1);
}
