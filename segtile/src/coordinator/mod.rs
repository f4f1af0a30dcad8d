//! Restartable units of work and their local executor.
//!
//! A run is split into a prepare unit, one segment unit per tile, one
//! stitch unit per adjacent tile pair and a finalize unit. Units talk to
//! each other only through the artifact store, under a caller-chosen run
//! scope, so each one can run on a different machine and any of them can be
//! re-run after a failure without touching the ones that finished.

mod artifact;
mod executor;
mod graph;
mod store;
mod units;


use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::raster::{RasterCatalog, RasterLocation};
use crate::stats::SpatialStatRegistry;

pub use artifact::{ArtifactKey, FinalizeArtifact, SegmentationPlan, TileArtifact};
pub use executor::{LocalExecutor, RunReport};
pub use graph::JobGraph;
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, DELETE_BATCH};

/// Key prefix isolating one run's artifacts from every other run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunScope(String);

impl RunScope {
    pub fn new(scope: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        let scope = scope.trim_end_matches('/').to_string();
        if scope.is_empty() {
            return Err(Error::config("scope", "must not be empty"));
        }
        if scope.starts_with('/') {
            return Err(Error::config("scope", format!("'{scope}' must be relative")));
        }
        if scope.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(Error::config(
                "scope",
                format!("'{scope}' contains an empty or '..' segment"),
            ));
        }
        Ok(Self(scope))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix matching every key of this scope and no other.
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl TryFrom<String> for RunScope {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RunScope> for String {
    fn from(scope: RunScope) -> Self {
        scope.0
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitKind {
    Prepare,
    Segment,
    Stitch,
    Finalize,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Segment => "segment",
            Self::Stitch => "stitch",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work. `index` is the tile for segment units and the pair
/// for stitch units; prepare and finalize use 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub kind: UnitKind,
    pub index: usize,
}

impl UnitId {
    pub const fn new(kind: UnitKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unit {}", self.kind, self.index)
    }
}

/// What a job submission carries to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRequest {
    pub scope: RunScope,
    pub unit: UnitId,
    pub source: RasterLocation,
    pub output: RasterLocation,
}

impl UnitRequest {
    pub fn new(
        scope: RunScope,
        unit: UnitId,
        source: RasterLocation,
        output: RasterLocation,
    ) -> Self {
        Self {
            scope,
            unit,
            source,
            output,
        }
    }
}

/// Everything a worker needs besides the request.
#[derive(Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub store: Arc<dyn ArtifactStore>,
    pub catalog: Arc<dyn RasterCatalog>,
    /// Functions that custom statistics selections may name.
    pub spatial_functions: SpatialStatRegistry,
}

impl RunContext {
    pub fn new(
        config: RunConfig,
        store: Arc<dyn ArtifactStore>,
        catalog: Arc<dyn RasterCatalog>,
    ) -> Self {
        Self {
            config,
            store,
            catalog,
            spatial_functions: SpatialStatRegistry::with_builtins(),
        }
    }

    pub fn with_spatial_functions(mut self, functions: SpatialStatRegistry) -> Self {
        self.spatial_functions = functions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Executed,
    /// The unit's completion document already existed.
    Skipped,
}

/// Runs one unit unless it already completed.
///
/// Dependencies must be complete; otherwise fails with
/// [`Error::DependencyNotReady`] without side effects. Any other failure is
/// wrapped with the unit's id.
pub fn execute_unit(request: &UnitRequest, ctx: &RunContext) -> Result<UnitOutcome> {
    run_unit(request, ctx).map_err(|e| e.in_unit(request.unit))
}

fn run_unit(request: &UnitRequest, ctx: &RunContext) -> Result<UnitOutcome> {
    let unit = request.unit;
    let store = ctx.store.as_ref();
    let scope = &request.scope;

    let finalize = ArtifactKey::for_unit(scope, UnitId::new(UnitKind::Finalize, 0));
    let key = ArtifactKey::for_unit(scope, unit);
    if store.exists(finalize.as_str())? || store.exists(key.as_str())? {
        tracing::info!(scope = %scope, unit = %unit, "Unit already complete, skipping");
        return Ok(UnitOutcome::Skipped);
    }

    match unit.kind {
        UnitKind::Prepare => {
            if unit.index != 0 {
                return Err(Error::precondition("the prepare unit has index 0"));
            }
            units::run_prepare(request, ctx, &key)?;
        }
        kind => {
            let plan = load_ready_plan(request, ctx)?;
            match kind {
                UnitKind::Segment => units::run_segment(request, ctx, &plan, &key)?,
                UnitKind::Stitch => units::run_stitch(request, ctx, &plan, &key)?,
                _ => units::run_finalize(request, ctx, &plan, &key)?,
            }
        }
    }
    Ok(UnitOutcome::Executed)
}

/// Loads the run's plan and checks that every dependency of the unit is
/// complete.
fn load_ready_plan(request: &UnitRequest, ctx: &RunContext) -> Result<SegmentationPlan> {
    let unit = request.unit;
    let scope = &request.scope;
    let store = ctx.store.as_ref();

    let prepare = ArtifactKey::for_unit(scope, UnitId::new(UnitKind::Prepare, 0));
    if !store.exists(prepare.as_str())? {
        return Err(Error::DependencyNotReady {
            unit,
            missing: vec![prepare.to_string()],
        });
    }
    let plan: SegmentationPlan = artifact::get_json(store, &prepare)?;
    let missing = JobGraph::from_plan(&plan).missing(unit, scope, store)?;
    if !missing.is_empty() {
        return Err(Error::DependencyNotReady {
            unit,
            missing: missing.iter().map(|k| k.to_string()).collect(),
        });
    }
    if plan.config != ctx.config {
        tracing::warn!(
            scope = %scope,
            unit = %unit,
            "Run configuration differs from the prepared plan; using the plan's"
        );
    }
    Ok(plan)
}
