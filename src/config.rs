use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::geometry::DEFAULT_TOLERANCE;
use crate::io::StageArea;
use crate::models::ADMIN_LEVEL_MAX;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub sources: SourcesConfig,
    pub reference: ReferenceConfig,
    pub tables: TablesConfig,
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the per-source input directories
    pub inputs: PathBuf,
    pub outputs: PathBuf,
    /// Root of the `pre` / `post` extension areas
    pub extended: PathBuf,
    /// Directory holding the global reference artifacts
    pub reference: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            inputs: PathBuf::from("inputs"),
            outputs: PathBuf::from("outputs"),
            extended: PathBuf::from("extended"),
            reference: PathBuf::from("inputs/un"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// Ranked sources copied by raw intake
    pub raw: Vec<String>,
    /// Ranked sources read by normalization; hand fixes come first
    pub normalize: Vec<String>,
    /// Source of supplementary polygons merged during extension
    pub additions: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            raw: vec!["hdx".to_string(), "itos".to_string()],
            normalize: vec!["fix".to_string(), "hdx".to_string(), "itos".to_string()],
            additions: "un".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReferenceConfig {
    pub standard_mask: String,
    /// Mask used for codes with the reserved prefix
    pub disputed_mask: String,
    pub lines: String,
    pub code_column: String,
    pub type_column: String,
    /// Line types never carried into the final output
    pub excluded_types: Vec<i64>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            standard_mask: "bnda_cty".to_string(),
            disputed_mask: "bnda_dsp".to_string(),
            lines: "bndl".to_string(),
            code_column: "iso3cd".to_string(),
            type_column: "bdytyp".to_string(),
            excluded_types: vec![6, 7],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TablesConfig {
    pub countries: PathBuf,
    /// Name tables, highest priority first
    pub names: Vec<PathBuf>,
    pub rules: PathBuf,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            countries: PathBuf::from("inputs/countries.csv"),
            names: vec![PathBuf::from("inputs/m49.csv")],
            rules: PathBuf::from("inputs/rules.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    /// Restrict the run to these countries; empty means all
    pub iso3: Vec<String>,
    pub max_level: u8,
    /// Worker threads; `None` lets rayon decide
    pub threads: Option<usize>,
    /// Snapping tolerance for boundary comparisons, in degrees
    pub tolerance: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iso3: Vec::new(),
            max_level: ADMIN_LEVEL_MAX,
            threads: None,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = config.rooted_at(base);
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with every path under `root`.
    pub fn with_root(root: &Path) -> Self {
        Config::default().rooted_at(root)
    }

    /// Resolve relative paths against `base`.
    pub fn rooted_at(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.inputs);
        resolve(&mut self.paths.outputs);
        resolve(&mut self.paths.extended);
        resolve(&mut self.paths.reference);
        resolve(&mut self.tables.countries);
        resolve(&mut self.tables.rules);
        self.tables.names.iter_mut().for_each(resolve);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.max_level > ADMIN_LEVEL_MAX {
            bail!(
                "run.max_level {} exceeds the deepest admin level {}",
                self.run.max_level,
                ADMIN_LEVEL_MAX
            );
        }
        if self.run.threads == Some(0) {
            bail!("run.threads must be at least 1");
        }
        if self.run.tolerance.is_nan() || self.run.tolerance < 0.0 {
            bail!("run.tolerance must be a non-negative number");
        }
        Ok(())
    }

    pub fn area_dir(&self, area: StageArea) -> PathBuf {
        if area.is_extension() {
            self.paths.extended.join(area.dir_name())
        } else {
            self.paths.outputs.join(area.dir_name())
        }
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.paths.inputs.join(source)
    }

    pub fn source_dirs(&self, sources: &[String]) -> Vec<PathBuf> {
        sources.iter().map(|s| self.source_dir(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = toml::from_str("[run]\niso3 = [\"FRA\"]\n").unwrap();
        assert_eq!(config.run.iso3, vec!["FRA".to_string()]);
        assert_eq!(config.run.max_level, ADMIN_LEVEL_MAX);
        assert_eq!(config.sources.normalize, vec!["fix", "hdx", "itos"]);
        assert_eq!(config.reference.excluded_types, vec![6, 7]);
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            "[paths]\noutputs = \"out\"\ninputs = \"/abs/inputs\"\n[tables]\nnames = [\"a.csv\", \"b.csv\"]\n",
        )
        .unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.paths.outputs, dir.path().join("out"));
        assert_eq!(config.paths.inputs, PathBuf::from("/abs/inputs"));
        assert_eq!(config.tables.names[1], dir.path().join("b.csv"));
        assert_eq!(
            config.area_dir(StageArea::Reviewed),
            dir.path().join("extended").join("post")
        );
    }

    #[test]
    fn test_invalid_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[run]\nmax_level = 9\n").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }
}
