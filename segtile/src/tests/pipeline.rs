use common::Buffer2;

use super::*;
use crate::coordinator::{ArtifactKey, UnitId, UnitKind};
use crate::raster::{RasterSource, SegmentRaster};
use crate::rat::{ColumnUsage, HISTOGRAM_COLUMN};
use crate::rat::ColumnType;
use crate::stats::{
    CustomColumn, CustomSelection, SegmentPixel, SpatialSelection, SpatialStatRegistry,
    SpatialStatistic, StatSelection, Statistic, StatsRequest,
};

/// 24x24 mosaic of 4x4 blocks whose 4-neighbours always differ, crossed by
/// a 4 pixel wide plus sign that spans every tile of a 3x3 grid.
fn mosaic_image() -> MemRaster {
    let mut pixels = Vec::with_capacity(24 * 24);
    for y in 0..24 {
        for x in 0..24 {
            let on_cross = (10..14).contains(&x) || (10..14).contains(&y);
            let value = if on_cross {
                100.0
            } else {
                let (bx, by) = (x / 4, y / 4);
                10.0 + ((bx * 7 + by * 3) % 5) as f64 * 10.0
            };
            pixels.push(value);
        }
    }
    MemRaster::single_band(Buffer2::new(24, 24, pixels), PixelType::U8, Some(0.0))
}

fn histogram_of(segments: &MemSegmentRaster) -> Vec<f64> {
    segments
        .rat()
        .expect("no attribute table")
        .histogram()
        .expect("no histogram")
        .to_vec()
}

#[test]
fn test_two_blocks_across_two_tiles() {
    let harness = Harness::new(run_config(10, 5, 1), two_block_image());
    let report = harness.run("runs/two-blocks").unwrap();
    assert_eq!(report.executed.len(), 5);
    assert!(report.skipped.is_empty());

    let output = harness.output();
    let labels = output.labels();
    assert_eq!(histogram_of(&output), vec![0.0, 50.0, 50.0]);
    // Left half is met first in scan order.
    assert_eq!(*labels.get(0, 0), 1);
    assert_eq!(*labels.get(9, 9), 2);
    for y in 0..10 {
        assert!(labels.row(y)[..5].iter().all(|&l| l == 1));
        assert!(labels.row(y)[5..].iter().all(|&l| l == 2));
    }
}

#[test]
fn test_tiled_run_matches_single_tile_run() {
    let single = Harness::new(run_config(24, 24, 4), mosaic_image());
    single.run("single").unwrap();
    let tiled = Harness::new(run_config(8, 8, 4), mosaic_image());
    let report = tiled.run("tiled").unwrap();
    // prepare + 9 tiles + 12 pairs + finalize
    assert_eq!(report.executed.len(), 23);

    let expected = single.output();
    let actual = tiled.output();
    assert_same_partition(&expected.labels(), &actual.labels());

    let mut expected_sizes = histogram_of(&expected);
    let mut actual_sizes = histogram_of(&actual);
    assert_eq!(expected_sizes.len(), actual_sizes.len());
    expected_sizes.sort_by(f64::total_cmp);
    actual_sizes.sort_by(f64::total_cmp);
    assert_eq!(expected_sizes, actual_sizes);
}

/// 16x8 of value 10 holding a 3x2 patch of 50 at columns 11..14 that tile
/// 0 of an 8x8 grid with overlap 4 only sees two pixels of, plus two single
/// pixel specks of 90.
fn cut_patch_image() -> MemRaster {
    let mut pixels = vec![10.0; 16 * 8];
    for y in 0..2 {
        for x in 11..14 {
            pixels[y * 16 + x] = 50.0;
        }
    }
    pixels[5 * 16 + 2] = 90.0;
    pixels[6 * 16 + 9] = 90.0;
    MemRaster::single_band(Buffer2::new(16, 8, pixels), PixelType::U8, Some(0.0))
}

fn eliminating_config(tile_width: usize, tile_height: usize, overlap: usize) -> RunConfig {
    let mut config = run_config(tile_width, tile_height, overlap);
    config.segmentation.min_segment_size = 3;
    config
}

#[test]
fn test_tiled_run_matches_single_tile_run_with_elimination() {
    let single = Harness::new(eliminating_config(16, 8, 4), cut_patch_image());
    single.run("single").unwrap();
    let tiled = Harness::new(eliminating_config(8, 8, 4), cut_patch_image());
    tiled.run("tiled").unwrap();

    let expected = single.output();
    let actual = tiled.output();
    // Specks are absorbed; the patch survives as its own segment.
    assert_eq!(histogram_of(&expected), vec![0.0, 122.0, 6.0]);
    assert_eq!(histogram_of(&actual), vec![0.0, 122.0, 6.0]);
    assert_same_partition(&expected.labels(), &actual.labels());
}

#[test]
fn test_ids_are_dense_and_cover_every_valid_pixel() {
    let mut pixels = mosaic_image_pixels();
    // Punch nodata holes.
    for i in (0..pixels.len()).step_by(37) {
        pixels[i] = 0.0;
    }
    let image =
        MemRaster::single_band(Buffer2::new(24, 24, pixels.clone()), PixelType::U8, Some(0.0));
    let harness = Harness::new(run_config(8, 8, 4), image);
    harness.run("dense").unwrap();

    let output = harness.output();
    let labels = output.labels();
    let histogram = histogram_of(&output);
    let max_id = (histogram.len() - 1) as u32;
    assert_eq!(histogram[0], 0.0);

    let mut counts = vec![0.0; histogram.len()];
    for (&label, &value) in labels.pixels().iter().zip(&pixels) {
        assert_eq!(label == 0, value == 0.0);
        assert!(label <= max_id);
        counts[label as usize] += 1.0;
    }
    counts[0] = 0.0;
    assert_eq!(counts, histogram);
    assert!(counts[1..].iter().all(|&c| c > 0.0), "id space has gaps");
}

fn mosaic_image_pixels() -> Vec<f64> {
    let image = mosaic_image();
    image
        .read_window(0, image.info().extent())
        .unwrap()
        .into_pixels()
}

#[test]
fn test_runs_are_deterministic() {
    let first = Harness::new(run_config(8, 8, 4), mosaic_image());
    first.run("a").unwrap();
    let second = Harness::new(run_config(8, 8, 4), mosaic_image());
    second.run("b").unwrap();

    assert_eq!(first.output().labels(), second.output().labels());
    assert_eq!(first.output().rat(), second.output().rat());
}

#[test]
fn test_colour_table_and_band_statistics() {
    let harness = Harness::new(run_config(10, 5, 1), two_block_image());
    harness.run("colours").unwrap();

    let output = harness.output();
    let rat = output.rat().unwrap();
    assert_eq!(rat.row_count(), 3);
    for usage in [
        ColumnUsage::Red,
        ColumnUsage::Green,
        ColumnUsage::Blue,
        ColumnUsage::Alpha,
    ] {
        assert!(rat.column_of_usage(usage).is_some(), "{usage:?} missing");
    }
    assert_eq!(rat.integer("Alpha").unwrap(), &[0, 255, 255]);
    assert!(rat.column(HISTOGRAM_COLUMN).is_some());

    let stats = output.band_statistics().unwrap();
    assert_eq!(stats.min, 1.0);
    assert_eq!(stats.max, 2.0);
    assert_eq!(stats.mean, 1.5);
    assert_eq!(stats.std_dev, 0.5);
}

#[test]
fn test_disabled_extras_are_not_written() {
    let config = RunConfig {
        colour_table: false,
        band_stats: false,
        ..run_config(10, 5, 1)
    };
    let harness = Harness::new(config, two_block_image());
    harness.run("plain").unwrap();

    let output = harness.output();
    assert!(output.band_statistics().is_none());
    assert!(output.rat().unwrap().column_of_usage(ColumnUsage::Red).is_none());
}

#[test]
fn test_finalize_runs_requested_statistics() {
    let mut config = run_config(10, 5, 1);
    config.stats.requests.push(StatsRequest {
        selection: vec![
            StatSelection {
                column: "MeanValue".to_string(),
                statistic: Statistic::Mean,
            },
            StatSelection {
                column: "Pixels".to_string(),
                statistic: Statistic::Count,
            },
        ],
        spatial: vec![SpatialSelection {
            column: "Left".to_string(),
            statistic: SpatialStatistic::XMin,
        }],
        ..Default::default()
    });
    let harness = Harness::new(config, two_block_image());
    harness.run("with-stats").unwrap();

    let rat = harness.output().rat().unwrap();
    assert_eq!(rat.real("MeanValue").unwrap(), &[0.0, 10.0, 200.0]);
    assert_eq!(rat.real("Pixels").unwrap(), &[0.0, 50.0, 50.0]);
    assert_eq!(rat.integer("Left").unwrap(), &[0, 0, 5]);
}

#[test]
fn test_finalize_runs_registered_functions() {
    let mut config = run_config(10, 5, 1);
    config.stats.requests.push(StatsRequest {
        custom: vec![CustomSelection {
            function: "scaled_sum".to_string(),
            param: 0.5,
            columns: vec![CustomColumn {
                name: "HalfSum".to_string(),
                column_type: ColumnType::Real,
            }],
        }],
        ..Default::default()
    });
    let mut functions = SpatialStatRegistry::with_builtins();
    functions.register(
        "scaled_sum",
        |pixels: &[SegmentPixel], param: f64, _columns: usize| {
            vec![pixels.iter().map(|p| p.value).sum::<f64>() * param]
        },
    );
    let mut harness = Harness::new(config, two_block_image());
    harness.ctx = harness.ctx.clone().with_spatial_functions(functions);
    harness.run("with-functions").unwrap();

    let rat = harness.output().rat().unwrap();
    assert_eq!(rat.real("HalfSum").unwrap(), &[0.0, 250.0, 5000.0]);
}

#[test]
fn test_unregistered_function_fails_finalize() {
    let mut config = run_config(10, 5, 1);
    config.stats.requests.push(StatsRequest {
        custom: vec![CustomSelection {
            function: "missing".to_string(),
            param: 0.0,
            columns: vec![CustomColumn {
                name: "X".to_string(),
                column_type: ColumnType::Real,
            }],
        }],
        ..Default::default()
    });
    let harness = Harness::new(config, two_block_image());
    let err = harness.run("missing-function").unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}

#[test]
fn test_intermediates_removed_after_finalize() {
    let harness = Harness::new(run_config(10, 5, 1), two_block_image());
    let scope = RunScope::new("runs/cleanup").unwrap();
    harness.run(scope.as_str()).unwrap();

    let finalize = ArtifactKey::for_unit(&scope, UnitId::new(UnitKind::Finalize, 0));
    assert_eq!(
        harness.store.list(&scope.prefix()).unwrap(),
        vec![finalize.to_string()]
    );
    assert_eq!(harness.store.delete_requests(), 1);
}

#[test]
fn test_retained_intermediates_survive_finalize() {
    let config = RunConfig {
        retain_intermediates: true,
        ..run_config(10, 5, 1)
    };
    let harness = Harness::new(config, two_block_image());
    let scope = RunScope::new("runs/debug").unwrap();
    harness.run(scope.as_str()).unwrap();

    let keys = harness.store.list(&scope.prefix()).unwrap();
    // plan, 2 x (labels + tile document), stitch, finalize
    assert_eq!(keys.len(), 7);
    assert!(keys.contains(&ArtifactKey::labels(&scope, 1).to_string()));
    assert_eq!(harness.store.delete_requests(), 0);
}

#[test]
fn test_scopes_do_not_interfere() {
    let store = Arc::new(MemoryArtifactStore::new());
    let kept = Harness::with_store(
        RunConfig {
            retain_intermediates: true,
            ..run_config(10, 5, 1)
        },
        two_block_image(),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&store),
    );
    kept.run("runs/a").unwrap();
    let cleaned = Harness::with_store(
        run_config(10, 5, 1),
        two_block_image(),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&store),
    );
    let report = cleaned.run("runs/ab").unwrap();

    // Nothing from "runs/a" is reused by "runs/ab".
    assert_eq!(report.executed.len(), 5);
    assert_eq!(store.list("runs/a/").unwrap().len(), 7);
    assert_eq!(store.list("runs/ab/").unwrap().len(), 1);
}

#[test]
fn test_cleanup_spares_nested_scope() {
    let store = Arc::new(MemoryArtifactStore::new());
    let nested = Harness::with_store(
        RunConfig {
            retain_intermediates: true,
            ..run_config(10, 5, 1)
        },
        two_block_image(),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&store),
    );
    nested.run("runs/a/b").unwrap();
    let before = store.list("runs/a/b/").unwrap();
    assert_eq!(before.len(), 7);

    let parent = Harness::with_store(
        run_config(10, 5, 1),
        two_block_image(),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&store),
    );
    parent.run("runs/a").unwrap();

    assert_eq!(store.list("runs/a/b/").unwrap(), before);
    let parent_scope = RunScope::new("runs/a").unwrap();
    let parent_finalize =
        ArtifactKey::for_unit(&parent_scope, UnitId::new(UnitKind::Finalize, 0));
    assert!(store.exists(parent_finalize.as_str()).unwrap());
    assert_eq!(store.len(), 8);
}
