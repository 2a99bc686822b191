//! Artifact persistence and stage directory layout.

mod artifact;
mod resolver;

use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::models::{AdminLevel, FeatureLayer};

pub use artifact::{read_layer, write_layer, ARTIFACT_EXT};
pub use resolver::{artifact_file_name, list_artifacts, SourceResolver};

/// Where a stage's artifacts live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageArea {
    RawCleaned,
    Normalized,
    Unified,
    /// Output of the extension step
    Extended,
    /// Hand-reviewed copies of extended layers
    Reviewed,
    Aggregated,
    AggregatedLines,
    EdgeMatched,
    EdgeMatchedLines,
}

impl StageArea {
    pub const ALL: [StageArea; 9] = [
        StageArea::RawCleaned,
        StageArea::Normalized,
        StageArea::Unified,
        StageArea::Extended,
        StageArea::Reviewed,
        StageArea::Aggregated,
        StageArea::AggregatedLines,
        StageArea::EdgeMatched,
        StageArea::EdgeMatchedLines,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            StageArea::RawCleaned => "level-1",
            StageArea::Normalized => "level-1a",
            StageArea::Unified => "level-1b",
            StageArea::Extended => "pre",
            StageArea::Reviewed => "post",
            StageArea::Aggregated => "level-2",
            StageArea::AggregatedLines => "level-2-lines",
            StageArea::EdgeMatched => "level-3",
            StageArea::EdgeMatchedLines => "level-3-lines",
        }
    }

    /// Extension areas sit under the extended root, the rest under outputs.
    pub fn is_extension(self) -> bool {
        matches!(self, StageArea::Extended | StageArea::Reviewed)
    }
}

/// Write `layer` into `dir` as `<name>_adm<level>` (or `<name>`).
pub fn save(dir: &Path, name: &str, level: Option<AdminLevel>, layer: &FeatureLayer) -> Result<()> {
    let path = dir.join(artifact_file_name(name, level));
    write_layer(&path, layer)?;
    info!("Saved {} ({} features)", path.display(), layer.len());
    Ok(())
}
