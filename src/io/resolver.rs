//! Ranked lookup of per-country layers across source directories.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::artifact::{read_layer, ARTIFACT_EXT};
use crate::error::Result;
use crate::models::{AdminLevel, FeatureLayer};

/// `<name>_adm<level>.json.gz`, or `<name>.json.gz` for level-less layers.
pub fn artifact_file_name(name: &str, level: Option<AdminLevel>) -> String {
    match level {
        Some(level) => format!("{}_adm{}.{}", name.to_lowercase(), level.get(), ARTIFACT_EXT),
        None => format!("{}.{}", name.to_lowercase(), ARTIFACT_EXT),
    }
}

/// Looks layers up in source directories, in caller-supplied order.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    dirs: Vec<PathBuf>,
}

impl SourceResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Path of the first source holding the layer.
    pub fn locate(&self, name: &str, level: Option<AdminLevel>) -> Option<PathBuf> {
        let file_name = artifact_file_name(name, level);
        self.dirs.iter().find_map(|dir| {
            let path = dir.join(&file_name);
            let exists = path.is_file();
            debug!("Lookup {} -> {}", path.display(), exists);
            exists.then_some(path)
        })
    }

    /// Best available layer for (country, level); `None` when no source has it.
    pub fn read(&self, iso3: &str, level: AdminLevel) -> Result<Option<FeatureLayer>> {
        self.read_named(iso3, Some(level))
    }

    pub fn read_named(&self, name: &str, level: Option<AdminLevel>) -> Result<Option<FeatureLayer>> {
        match self.locate(name, level) {
            Some(path) => read_layer(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Deepest level available at or below `max`, with its layer.
    pub fn finest_level(
        &self,
        iso3: &str,
        max: AdminLevel,
    ) -> Result<Option<(AdminLevel, FeatureLayer)>> {
        for level in max.descending() {
            if let Some(layer) = self.read(iso3, level)? {
                return Ok(Some((level, layer)));
            }
        }
        Ok(None)
    }
}

/// Every artifact below `dir`, sorted by path.
pub fn list_artifacts(dir: &Path) -> Vec<PathBuf> {
    let suffix = format!(".{}", ARTIFACT_EXT);
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(&suffix))
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_layer;
    use crate::models::{Feature, Value, WGS84};
    use geo::{point, Geometry};

    fn layer(tag: &str) -> FeatureLayer {
        FeatureLayer::with_features(
            vec!["tag".to_string()],
            WGS84,
            vec![Feature::new(
                vec![Value::from(tag)],
                Geometry::Point(point!(x: 0.0, y: 0.0)),
            )],
        )
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name("FRA", AdminLevel::new(2)),
            "fra_adm2.json.gz"
        );
        assert_eq!(artifact_file_name("FRA", None), "fra.json.gz");
    }

    #[test]
    fn test_first_source_wins() {
        let root = tempfile::tempdir().unwrap();
        let fix = root.path().join("fix");
        let hdx = root.path().join("hdx");
        let l1 = AdminLevel::new(1).unwrap();
        write_layer(&fix.join(artifact_file_name("TST", Some(l1))), &layer("fix")).unwrap();
        write_layer(&hdx.join(artifact_file_name("TST", Some(l1))), &layer("hdx")).unwrap();

        let resolver = SourceResolver::new(vec![fix.clone(), hdx.clone()]);
        let found = resolver.read("TST", l1).unwrap().unwrap();
        assert_eq!(found.features()[0].properties[0], Value::from("fix"));

        let reversed = SourceResolver::new(vec![hdx, fix]);
        let found = reversed.read("TST", l1).unwrap().unwrap();
        assert_eq!(found.features()[0].properties[0], Value::from("hdx"));

        assert!(resolver.read("TST", AdminLevel::COUNTRY).unwrap().is_none());
    }

    #[test]
    fn test_finest_level() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("hdx");
        for l in [0, 2] {
            let level = AdminLevel::new(l).unwrap();
            write_layer(&src.join(artifact_file_name("tst", Some(level))), &layer("x")).unwrap();
        }
        let resolver = SourceResolver::new(vec![src.clone()]);
        let (level, _) = resolver.finest_level("TST", AdminLevel::MAX).unwrap().unwrap();
        assert_eq!(level.get(), 2);
        assert!(resolver.finest_level("ABC", AdminLevel::MAX).unwrap().is_none());
        assert_eq!(list_artifacts(&src).len(), 2);
    }
}
