//! Runs every unit of a run in-process.

use rayon::prelude::*;

use super::artifact::{get_json, ArtifactKey, SegmentationPlan};
use super::graph::JobGraph;
use super::{execute_unit, RunContext, RunScope, UnitId, UnitKind, UnitOutcome, UnitRequest};
use crate::error::{Error, Result};
use crate::raster::RasterLocation;

/// Units run or skipped by one [`LocalExecutor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<UnitId>,
    pub skipped: Vec<UnitId>,
}

impl RunReport {
    fn record(&mut self, unit: UnitId, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Executed => self.executed.push(unit),
            UnitOutcome::Skipped => self.skipped.push(unit),
        }
    }
}

/// Executes a run phase by phase on a bounded thread pool.
///
/// Units of one phase run concurrently. A failing unit does not stop the
/// rest of its phase, so a re-run only has the failed units left to do; the
/// next phase is not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalExecutor {
    workers: usize,
}

impl LocalExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run(
        &self,
        scope: &RunScope,
        source: &RasterLocation,
        output: &RasterLocation,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("segtile-{i}"))
            .build()
            .map_err(|err| Error::config("workers", err.to_string()))?;

        let request = |unit| UnitRequest::new(scope.clone(), unit, source.clone(), output.clone());
        let mut report = RunReport::default();

        let prepare = UnitId::new(UnitKind::Prepare, 0);
        let finalize = UnitId::new(UnitKind::Finalize, 0);
        let finalize_key = ArtifactKey::for_unit(scope, finalize);
        if ctx.store.exists(finalize_key.as_str())? {
            tracing::info!(scope = %scope, "Run already finalized");
            report.skipped.push(finalize);
            return Ok(report);
        }

        report.record(prepare, execute_unit(&request(prepare), ctx)?);
        let plan: SegmentationPlan =
            get_json(ctx.store.as_ref(), &ArtifactKey::for_unit(scope, prepare))?;
        let graph = JobGraph::from_plan(&plan);
        tracing::info!(
            scope = %scope,
            workers = self.workers,
            tiles = graph.tile_count(),
            pairs = graph.pair_count(),
            "Starting local run"
        );

        for kind in [UnitKind::Segment, UnitKind::Stitch] {
            let units = graph.units_of(kind);
            let outcomes: Vec<(UnitId, Result<UnitOutcome>)> = pool.install(|| {
                units
                    .par_iter()
                    .map(|&unit| (unit, execute_unit(&request(unit), ctx)))
                    .collect()
            });

            let mut first_error = None;
            for (unit, outcome) in outcomes {
                match outcome {
                    Ok(outcome) => report.record(unit, outcome),
                    Err(err) => {
                        tracing::error!(unit = %unit, error = %err, "Unit failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        report.record(finalize, execute_unit(&request(finalize), ctx)?);
        tracing::info!(
            scope = %scope,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "Local run complete"
        );
        Ok(report)
    }
}
