//! Bodies of the four unit kinds.

use std::sync::Arc;

use common::Buffer2;
use hashbrown::HashMap;

use super::artifact::{
    decode_labels, encode_labels, get_json, put_json, ArtifactKey, FinalizeArtifact,
    SegmentationPlan, TileArtifact,
};
use super::graph::JobGraph;
use super::{RunContext, UnitId, UnitKind, UnitRequest};
use crate::error::{Error, Result};
use crate::raster::{segment_info_for, RasterSource};
use crate::rat::{estimate_stats_from_histogram, write_random_colour_table, RatEngine};
use crate::segmentation::{fit_clusters, segment_tile};
use crate::stats::calc_segment_stats_with;
use crate::stitch::{core_label_counts, stitch_pair, GlobalIdResolver, PairEvidence};
use crate::tiling::TileGrid;

pub(super) fn run_prepare(
    request: &UnitRequest,
    ctx: &RunContext,
    key: &ArtifactKey,
) -> Result<()> {
    let config = &ctx.config;
    config.validate()?;

    let source = ctx.catalog.open_source(&request.source)?;
    let info = source.info().clone();
    let grid = TileGrid::plan(info.width, info.height, &config.tiling)?;
    tracing::info!(
        scope = %request.scope,
        source = %request.source,
        width = info.width,
        height = info.height,
        tiles = grid.len(),
        "Preparing segmentation run"
    );
    let clusters = fit_clusters(source.as_ref(), &grid, &config.segmentation)?;

    let plan = SegmentationPlan {
        source: request.source.clone(),
        source_info: info,
        pairs: grid.pairs(),
        grid,
        clusters,
        config: config.clone(),
    };
    put_json(ctx.store.as_ref(), key, &plan)?;
    tracing::info!(
        scope = %request.scope,
        clusters = plan.clusters.len(),
        pairs = plan.pairs.len(),
        "Prepared segmentation run"
    );
    Ok(())
}

fn open_planned_source(
    request: &UnitRequest,
    ctx: &RunContext,
    plan: &SegmentationPlan,
) -> Result<Arc<dyn RasterSource>> {
    let source = ctx.catalog.open_source(&request.source)?;
    plan.source_info.check_aligned(source.info())?;
    if source.info().bands != plan.source_info.bands {
        return Err(Error::precondition(format!(
            "source has {} bands, the run was prepared with {}",
            source.info().bands,
            plan.source_info.bands
        )));
    }
    Ok(source)
}

pub(super) fn run_segment(
    request: &UnitRequest,
    ctx: &RunContext,
    plan: &SegmentationPlan,
    key: &ArtifactKey,
) -> Result<()> {
    let tile = plan.grid.tile(request.unit.index)?;
    let source = open_planned_source(request, ctx, plan)?;

    let bands = source.read_bands(tile.window)?;
    let seg = segment_tile(
        &bands,
        plan.source_info.nodata,
        &plan.clusters,
        &plan.config.segmentation,
        plan.grid.cut_edges(tile),
    )?;
    if seg.num_segments == 0 {
        tracing::warn!(tile = tile.index, window = %tile.window, "Tile contains only nodata");
    }
    let core_counts = core_label_counts(&seg.labels, tile.core_in_window(), seg.num_segments);

    let store = ctx.store.as_ref();
    let labels_key = ArtifactKey::labels(&request.scope, tile.index);
    store.put(labels_key.as_str(), &encode_labels(&seg.labels))?;
    put_json(
        store,
        key,
        &TileArtifact {
            tile: tile.index,
            width: seg.labels.width(),
            height: seg.labels.height(),
            num_segments: seg.num_segments,
            core_counts,
        },
    )?;
    tracing::info!(
        tile = tile.index,
        window = %tile.window,
        segments = seg.num_segments,
        "Segmented tile"
    );
    Ok(())
}

fn load_tile(
    ctx: &RunContext,
    request: &UnitRequest,
    tile: usize,
) -> Result<(TileArtifact, Buffer2<u32>)> {
    let store = ctx.store.as_ref();
    let meta: TileArtifact = get_json(
        store,
        &ArtifactKey::for_unit(&request.scope, UnitId::new(UnitKind::Segment, tile)),
    )?;
    let labels_key = ArtifactKey::labels(&request.scope, tile);
    let bytes = store.get(labels_key.as_str())?;
    let labels = decode_labels(&labels_key, &bytes, meta.width, meta.height)?;
    Ok((meta, labels))
}

pub(super) fn run_stitch(
    request: &UnitRequest,
    ctx: &RunContext,
    plan: &SegmentationPlan,
    key: &ArtifactKey,
) -> Result<()> {
    let pair = plan.pairs.get(request.unit.index).ok_or_else(|| {
        Error::precondition(format!("pair {} is not in the plan", request.unit.index))
    })?;
    let (_, labels_a) = load_tile(ctx, request, pair.a)?;
    let (_, labels_b) = load_tile(ctx, request, pair.b)?;

    let evidence = stitch_pair(&plan.grid, pair, &labels_a, &labels_b, &plan.config.stitch)?;
    put_json(ctx.store.as_ref(), key, &evidence)?;
    tracing::info!(
        pair = pair.index,
        tile_a = pair.a,
        tile_b = pair.b,
        edges = evidence.edges.len(),
        "Stitched tile pair"
    );
    Ok(())
}

pub(super) fn run_finalize(
    request: &UnitRequest,
    ctx: &RunContext,
    plan: &SegmentationPlan,
    key: &ArtifactKey,
) -> Result<()> {
    let config = &plan.config;
    let store = ctx.store.as_ref();
    let scope = &request.scope;

    let mut resolver = GlobalIdResolver::new();
    for tile in plan.grid.tiles() {
        let meta: TileArtifact = get_json(
            store,
            &ArtifactKey::for_unit(scope, UnitId::new(UnitKind::Segment, tile.index)),
        )?;
        resolver.add_tile(tile.index, meta.num_segments, &meta.core_counts)?;
    }
    for pair in &plan.pairs {
        let evidence: PairEvidence = get_json(
            store,
            &ArtifactKey::for_unit(scope, UnitId::new(UnitKind::Stitch, pair.index)),
        )?;
        resolver.merge_evidence(&evidence)?;
    }
    let ids = resolver.resolve();

    let output = ctx
        .catalog
        .create_segments(&request.output, &segment_info_for(&plan.source_info))?;
    let mut histogram = RatEngine::new(config.page_size, ids.max_id())?;
    histogram.create_all_pages()?;
    for tile in plan.grid.tiles() {
        let (_, labels) = load_tile(ctx, request, tile.index)?;
        let core = tile.core_in_window();
        let global = ids
            .relabel(tile.index, &labels)
            .crop(core.x, core.y, core.width, core.height);
        output.write_labels(tile.core, &global)?;

        let mut counts: HashMap<u32, u64> = HashMap::new();
        for &id in global.pixels().iter().filter(|&&id| id != 0) {
            *counts.entry(id).or_default() += 1;
        }
        for (id, count) in counts {
            histogram.upsert_row(id, count as f64)?;
        }
        tracing::debug!(tile = tile.index, core = %tile.core, "Wrote tile core");
    }
    histogram.mark_all_complete()?;

    let mut rat = output.rat().unwrap_or_default();
    histogram.finalize(&mut rat)?;
    if config.colour_table {
        write_random_colour_table(&mut rat, config.colour_seed)?;
    }
    if config.band_stats {
        if let Some(stats) = rat.histogram().and_then(estimate_stats_from_histogram) {
            output.set_band_statistics(stats)?;
        }
    }
    output.set_rat(rat)?;

    for stats_request in &config.stats.requests {
        let location = stats_request.image.as_ref().unwrap_or(&request.source);
        let source = ctx.catalog.open_source(location)?;
        calc_segment_stats_with(
            output.as_ref(),
            source.as_ref(),
            stats_request,
            &config.stats,
            config.page_size,
            &ctx.spatial_functions,
        )?;
    }

    put_json(
        store,
        key,
        &FinalizeArtifact {
            output: request.output.clone(),
            max_id: ids.max_id(),
            tiles: plan.grid.len(),
            stats_passes: config.stats.requests.len(),
            retained_intermediates: config.retain_intermediates,
        },
    )?;
    tracing::info!(
        scope = %scope,
        output = %request.output,
        segments = ids.max_id(),
        "Finalized segmentation"
    );

    if !config.retain_intermediates {
        let keys: Vec<String> = JobGraph::from_plan(plan)
            .intermediate_keys(scope)
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        match store.delete_many(&keys) {
            Ok(deleted) => tracing::info!(scope = %scope, deleted, "Removed intermediates"),
            Err(err) => {
                tracing::warn!(scope = %scope, error = %err, "Failed to remove intermediates")
            }
        }
    }
    Ok(())
}
