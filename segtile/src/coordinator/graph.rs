//! Unit dependencies of a planned run.

use super::artifact::{ArtifactKey, SegmentationPlan};
use super::store::ArtifactStore;
use super::{RunScope, UnitId, UnitKind};
use crate::error::{Error, Result};
use crate::tiling::TilePair;

/// Units of one run and what each waits for.
///
/// Segment units depend on prepare, a stitch unit on the segment units of
/// its two tiles, and finalize on every segment and stitch unit.
#[derive(Debug, Clone, PartialEq)]
pub struct JobGraph {
    tiles: usize,
    pairs: Vec<TilePair>,
}

impl JobGraph {
    pub fn from_plan(plan: &SegmentationPlan) -> Self {
        Self {
            tiles: plan.grid.len(),
            pairs: plan.pairs.clone(),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Every unit, dependencies before dependents.
    pub fn units(&self) -> Vec<UnitId> {
        let mut units = Vec::with_capacity(self.tiles + self.pairs.len() + 2);
        units.push(UnitId::new(UnitKind::Prepare, 0));
        units.extend((0..self.tiles).map(|i| UnitId::new(UnitKind::Segment, i)));
        units.extend((0..self.pairs.len()).map(|i| UnitId::new(UnitKind::Stitch, i)));
        units.push(UnitId::new(UnitKind::Finalize, 0));
        units
    }

    /// Every key the run writes before finalize: unit documents and label
    /// payloads. Keys of other scopes are never included, even when their
    /// scope starts with this one.
    pub fn intermediate_keys(&self, scope: &RunScope) -> Vec<ArtifactKey> {
        let mut keys: Vec<ArtifactKey> = self
            .units()
            .into_iter()
            .filter(|u| u.kind != UnitKind::Finalize)
            .map(|u| ArtifactKey::for_unit(scope, u))
            .collect();
        keys.extend((0..self.tiles).map(|tile| ArtifactKey::labels(scope, tile)));
        keys
    }

    pub fn units_of(&self, kind: UnitKind) -> Vec<UnitId> {
        self.units().into_iter().filter(|u| u.kind == kind).collect()
    }

    pub fn dependencies(&self, unit: UnitId) -> Result<Vec<UnitId>> {
        let out_of_range = |count: usize| {
            Error::precondition(format!("{unit} is not part of a run with {count} such units"))
        };
        let prepare = UnitId::new(UnitKind::Prepare, 0);
        match unit.kind {
            UnitKind::Prepare if unit.index == 0 => Ok(Vec::new()),
            UnitKind::Prepare => Err(out_of_range(1)),
            UnitKind::Segment if unit.index < self.tiles => Ok(vec![prepare]),
            UnitKind::Segment => Err(out_of_range(self.tiles)),
            UnitKind::Stitch => {
                let pair = self
                    .pairs
                    .get(unit.index)
                    .ok_or_else(|| out_of_range(self.pairs.len()))?;
                Ok(vec![
                    prepare,
                    UnitId::new(UnitKind::Segment, pair.a),
                    UnitId::new(UnitKind::Segment, pair.b),
                ])
            }
            UnitKind::Finalize if unit.index == 0 => {
                let mut deps = self.units();
                deps.pop();
                Ok(deps)
            }
            UnitKind::Finalize => Err(out_of_range(1)),
        }
    }

    /// Dependencies of `unit` whose artifacts are not in the store yet.
    pub fn missing(
        &self,
        unit: UnitId,
        scope: &RunScope,
        store: &dyn ArtifactStore,
    ) -> Result<Vec<ArtifactKey>> {
        let mut missing = Vec::new();
        for dep in self.dependencies(unit)? {
            let key = ArtifactKey::for_unit(scope, dep);
            if !store.exists(key.as_str())? {
                missing.push(key);
            }
        }
        Ok(missing)
    }

    pub fn is_ready(
        &self,
        unit: UnitId,
        scope: &RunScope,
        store: &dyn ArtifactStore,
    ) -> Result<bool> {
        Ok(self.missing(unit, scope, store)?.is_empty())
    }

    /// Units without a completion document. Empty once finalize is done,
    /// even though finalize removes the other documents.
    pub fn pending(&self, scope: &RunScope, store: &dyn ArtifactStore) -> Result<Vec<UnitId>> {
        let finalize = ArtifactKey::for_unit(scope, UnitId::new(UnitKind::Finalize, 0));
        if store.exists(finalize.as_str())? {
            return Ok(Vec::new());
        }
        let mut pending = Vec::new();
        for unit in self.units() {
            if !store.exists(ArtifactKey::for_unit(scope, unit).as_str())? {
                pending.push(unit);
            }
        }
        Ok(pending)
    }
}
