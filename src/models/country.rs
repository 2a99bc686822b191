//! Country registry.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Alpha-3 prefix reserved for disputed or administered territories
pub const RESERVED_PREFIX: char = 'X';

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Country {
    pub iso2: String,
    pub iso3: String,
    pub numeric: String,
    pub name: String,
}

impl Country {
    pub fn new(iso2: &str, iso3: &str, numeric: &str, name: &str) -> Self {
        Self {
            iso2: iso2.to_string(),
            iso3: iso3.to_string(),
            numeric: numeric.to_string(),
            name: name.to_string(),
        }
    }

    /// Territories carrying a reserved code are clipped against the
    /// disputed-area mask.
    pub fn is_synthetic(&self) -> bool {
        self.iso3.starts_with(RESERVED_PREFIX)
    }
}

/// Entries always present in addition to the loaded registry
fn synthetic_entries() -> Vec<Country> {
    vec![
        Country::new("XI", "XIK", "900", "India-administered Kashmir"),
        Country::new("XP", "XPK", "901", "Pakistan-administered Kashmir"),
        Country::new("XS", "XSG", "902", "Siachen Glacier"),
    ]
}

/// Enumerable, read-only set of countries for one run
#[derive(Debug, Clone, Default)]
pub struct CountryRegistry {
    countries: Vec<Country>,
}

impl CountryRegistry {
    /// Build from explicit entries plus the synthetic territories.
    pub fn from_countries(countries: Vec<Country>) -> Self {
        let mut registry = Self { countries };
        for entry in synthetic_entries() {
            if registry.get(&entry.iso3).is_none() {
                registry.countries.push(entry);
            }
        }
        registry
    }

    /// Load an `iso2,iso3,numeric,name` CSV.
    pub fn load_csv(path: &Path) -> Result<Self> {
        info!("Loading country registry from {}", path.display());
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut countries = Vec::new();
        for record in reader.deserialize() {
            let mut country: Country = record?;
            country.iso3 = country.iso3.trim().to_uppercase();
            country.iso2 = country.iso2.trim().to_uppercase();
            if country.iso3.len() != 3 {
                return Err(PipelineError::Config(format!(
                    "invalid iso3 '{}' in {}",
                    country.iso3,
                    path.display()
                )));
            }
            countries.push(country);
        }

        let registry = Self::from_countries(countries);
        info!("Loaded {} countries", registry.len());
        Ok(registry)
    }

    pub fn get(&self, iso3: &str) -> Option<&Country> {
        self.countries.iter().find(|c| c.iso3.eq_ignore_ascii_case(iso3))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Country> {
        self.countries.iter()
    }

    /// Countries selected by an iso3 filter; an empty filter selects all.
    pub fn selected(&self, iso3_filter: &[String]) -> Vec<&Country> {
        self.countries
            .iter()
            .filter(|c| {
                iso3_filter.is_empty()
                    || iso3_filter.iter().any(|f| f.eq_ignore_ascii_case(&c.iso3))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_synthetic_entries_appended_once() {
        let registry = CountryRegistry::from_countries(vec![
            Country::new("IN", "IND", "356", "India"),
            Country::new("XI", "XIK", "900", "Custom Kashmir"),
        ]);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("xik").unwrap().name, "Custom Kashmir");
        assert!(registry.get("XSG").unwrap().is_synthetic());
        assert!(!registry.get("IND").unwrap().is_synthetic());
    }

    #[test]
    fn test_load_csv_and_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iso2,iso3,numeric,name").unwrap();
        writeln!(file, "fr,fra,250,France").unwrap();
        writeln!(file, "DE,DEU,276,Germany").unwrap();
        let registry = CountryRegistry::load_csv(file.path()).unwrap();
        assert_eq!(registry.get("FRA").unwrap().iso2, "FR");

        let selected = registry.selected(&["deu".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].iso3, "DEU");
        assert_eq!(registry.selected(&[]).len(), registry.len());
    }
}
