//! Administrative level numbering and column naming.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest admin level any source provides
pub const ADMIN_LEVEL_MAX: u8 = 5;

/// Administrative depth: 0 is the country, larger numbers are finer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminLevel(u8);

impl AdminLevel {
    pub const COUNTRY: AdminLevel = AdminLevel(0);
    pub const MAX: AdminLevel = AdminLevel(ADMIN_LEVEL_MAX);

    /// Checked constructor; levels above [`ADMIN_LEVEL_MAX`] are rejected.
    pub fn new(level: u8) -> Option<Self> {
        (level <= ADMIN_LEVEL_MAX).then_some(AdminLevel(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The next coarser level, `None` for the country level
    pub fn parent(self) -> Option<AdminLevel> {
        self.0.checked_sub(1).map(AdminLevel)
    }

    /// This level and every coarser one, finest first.
    pub fn descending(self) -> impl Iterator<Item = AdminLevel> {
        (0..=self.0).rev().map(AdminLevel)
    }

    /// Hierarchical code column, e.g. `ADM1_PCODE` or `adm1_pcode`.
    pub fn code_column(self, upper: bool) -> String {
        if upper {
            format!("ADM{}_PCODE", self.0)
        } else {
            format!("adm{}_pcode", self.0)
        }
    }

    /// Source-style language column, e.g. `ADM1_EN`.
    pub fn source_name_column(self, lang: &str) -> String {
        format!("ADM{}_{}", self.0, lang.to_uppercase())
    }

    /// Canonical slotted name column: `adm1_name`, `adm1_name1`, ...
    pub fn name_column(self, slot: usize) -> String {
        if slot == 0 {
            format!("adm{}_name", self.0)
        } else {
            format!("adm{}_name{}", self.0, slot)
        }
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adm{}", self.0)
    }
}

/// Language-slot column paired with canonical names: `lang`, `lang1`, ...
pub fn lang_column(slot: usize) -> String {
    if slot == 0 {
        "lang".to_string()
    } else {
        format!("lang{}", slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bounds() {
        assert!(AdminLevel::new(5).is_some());
        assert!(AdminLevel::new(6).is_none());
        assert_eq!(AdminLevel::COUNTRY.parent(), None);
        assert_eq!(AdminLevel::MAX.parent(), AdminLevel::new(4));
    }

    #[test]
    fn test_descending() {
        let levels: Vec<u8> = AdminLevel::new(2).unwrap().descending().map(|l| l.get()).collect();
        assert_eq!(levels, vec![2, 1, 0]);
    }

    #[test]
    fn test_column_names() {
        let l = AdminLevel::new(3).unwrap();
        assert_eq!(l.code_column(true), "ADM3_PCODE");
        assert_eq!(l.code_column(false), "adm3_pcode");
        assert_eq!(l.source_name_column("en"), "ADM3_EN");
        assert_eq!(l.name_column(0), "adm3_name");
        assert_eq!(l.name_column(2), "adm3_name2");
        assert_eq!(lang_column(0), "lang");
        assert_eq!(lang_column(1), "lang1");
        assert_eq!(l.to_string(), "adm3");
    }
}
