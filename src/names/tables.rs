//! Reference country-name tables (`iso3`, `<lang>_short`, ...).

use std::fs::File;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

const KEY_COLUMN: &str = "iso3";
const SHORT_SUFFIX: &str = "_short";

/// Short names of one table, by iso3 then language
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    source: String,
    names: HashMap<String, HashMap<String, String>>,
}

impl NameTable {
    pub fn from_rows<'a>(
        source: &str,
        rows: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    ) -> Self {
        let mut names: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (iso3, lang, name) in rows {
            names
                .entry(iso3.to_uppercase())
                .or_default()
                .insert(lang.to_lowercase(), name.to_string());
        }
        Self {
            source: source.to_string(),
            names,
        }
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers()?.clone();
        let key = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(KEY_COLUMN))
            .ok_or_else(|| PipelineError::missing_column(KEY_COLUMN, path.display().to_string()))?;
        let languages: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| {
                h.trim()
                    .strip_suffix(SHORT_SUFFIX)
                    .map(|lang| (i, lang.to_lowercase()))
            })
            .collect();

        let mut names: HashMap<String, HashMap<String, String>> = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let Some(iso3) = record.get(key).map(|s| s.trim().to_uppercase()) else {
                continue;
            };
            let entry = names.entry(iso3).or_default();
            for (i, lang) in &languages {
                if let Some(value) = record.get(*i) {
                    entry.insert(lang.clone(), value.trim().to_string());
                }
            }
        }

        let source = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "Loaded name table {} ({} countries, {} languages)",
            source,
            names.len(),
            languages.len()
        );
        Ok(Self { source, names })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn short_name(&self, iso3: &str, lang: &str) -> Option<&str> {
        self.names
            .get(&iso3.to_uppercase())
            .and_then(|langs| langs.get(&lang.to_lowercase()))
            .map(String::as_str)
    }
}

/// Name tables in priority order
#[derive(Debug, Clone, Default)]
pub struct NameTables {
    tables: Vec<NameTable>,
}

impl NameTables {
    pub fn from_tables(tables: Vec<NameTable>) -> Self {
        Self { tables }
    }

    /// Load every existing table; missing files are skipped with a warning.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.exists() {
                warn!("Name table {} not found, skipping", path.display());
                continue;
            }
            tables.push(NameTable::load_csv(path)?);
        }
        Ok(Self { tables })
    }

    /// First non-empty short name across the tables.
    pub fn short_name(&self, iso3: &str, lang: &str) -> Option<&str> {
        self.tables
            .iter()
            .filter_map(|t| t.short_name(iso3, lang))
            .find(|name| !name.is_empty())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_csv_and_priority() {
        let dir = tempfile::tempdir().unwrap();
        let m49 = dir.path().join("m49.csv");
        fs::write(
            &m49,
            "iso3,en_short,fr_short,region\nFRA,France,,Europe\nCIV,Côte d'Ivoire,Côte d'Ivoire,Africa\n",
        )
        .unwrap();
        let extra = dir.path().join("extra.csv");
        fs::write(&extra, "iso3,fr_short\nFRA,France\n").unwrap();

        let tables = NameTables::load(&[m49, dir.path().join("missing.csv"), extra]).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables.short_name("fra", "EN"), Some("France"));
        // the first table's entry is empty, so the second one answers
        assert_eq!(tables.short_name("FRA", "fr"), Some("France"));
        assert_eq!(tables.short_name("CIV", "fr"), Some("Côte d'Ivoire"));
        assert_eq!(tables.short_name("DEU", "en"), None);
    }

    #[test]
    fn test_missing_key_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "code,en_short\nFRA,France\n").unwrap();
        assert!(matches!(
            NameTable::load_csv(&path),
            Err(PipelineError::MissingColumn { .. })
        ));
    }
}
