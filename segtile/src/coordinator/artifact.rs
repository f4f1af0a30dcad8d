//! Artifact keys and payloads exchanged between units.

use std::fmt;

use common::Buffer2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::store::ArtifactStore;
use super::{RunScope, UnitId, UnitKind};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::raster::{RasterInfo, RasterLocation};
use crate::segmentation::SpectralClusters;
use crate::tiling::{TileGrid, TilePair};

/// Store key of a unit's completion document.
///
/// `{scope}/{kind}/{index:05}.json`. Segment units also write a raw label
/// payload next to it; the JSON document is always written last, so its
/// presence means the unit finished.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn for_unit(scope: &RunScope, unit: UnitId) -> Self {
        Self(format!("{scope}/{}/{:05}.json", unit.kind, unit.index))
    }

    /// Raw label payload of a segment unit.
    pub fn labels(scope: &RunScope, tile: usize) -> Self {
        Self(format!("{scope}/{}/{tile:05}.labels", UnitKind::Segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of the prepare unit; every later unit reads its parameters from
/// here so that all units of a run agree on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationPlan {
    pub source: RasterLocation,
    pub source_info: RasterInfo,
    pub grid: TileGrid,
    pub pairs: Vec<TilePair>,
    pub clusters: SpectralClusters,
    pub config: RunConfig,
}

/// Completion document of a segment unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileArtifact {
    pub tile: usize,
    pub width: usize,
    pub height: usize,
    pub num_segments: u32,
    /// Core pixels per local label, indexed by `label - 1`.
    pub core_counts: Vec<u64>,
}

/// Completion document of the finalize unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeArtifact {
    pub output: RasterLocation,
    pub max_id: u32,
    pub tiles: usize,
    pub stats_passes: usize,
    pub retained_intermediates: bool,
}

pub(crate) fn put_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| Error::Codec {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    store.put(key.as_str(), &bytes)
}

pub(crate) fn get_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
) -> Result<T> {
    let bytes = store.get(key.as_str())?;
    serde_json::from_slice(&bytes).map_err(|err| Error::Codec {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

/// Labels as raw little-endian `u32` values, independent of the host.
pub(crate) fn encode_labels(labels: &Buffer2<u32>) -> Vec<u8> {
    let little: Vec<u32> = labels.pixels().iter().map(|v| v.to_le()).collect();
    bytemuck::cast_slice(&little).to_vec()
}

pub(crate) fn decode_labels(
    key: &ArtifactKey,
    bytes: &[u8],
    width: usize,
    height: usize,
) -> Result<Buffer2<u32>> {
    let expected = width * height * std::mem::size_of::<u32>();
    if bytes.len() != expected {
        return Err(Error::Codec {
            key: key.to_string(),
            reason: format!(
                "label payload holds {} bytes, {width}x{height} labels need {expected}",
                bytes.len()
            ),
        });
    }
    let pixels: Vec<u32> = bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
        .into_iter()
        .map(u32::from_le)
        .collect();
    Ok(Buffer2::new(width, height, pixels))
}
