//! Explicit column-role descriptor for boundary layers.
//!
//! Column names carry the hierarchy (`ADM1_PCODE`), the languages
//! (`ADM1_EN`) and, after unification, the language slots (`adm1_name1`,
//! `lang1`). The descriptor classifies every column once so stages can ask
//! for roles instead of re-scanning names.

use std::sync::OnceLock;

use regex::Regex;

/// What a column holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    /// Per-level name: source style carries the language (`ADM1_EN`),
    /// canonical style carries the slot (`adm1_name1`).
    Name {
        level: u8,
        lang: Option<String>,
        slot: Option<usize>,
    },
    /// Hierarchical code of a level
    Code { level: u8 },
    /// Language occupying a canonical name slot
    Lang { slot: usize },
    Date,
    ValidOn,
    ValidTo,
    Area,
    Other,
}

struct Patterns {
    source_name: Regex,
    canonical_name: Regex,
    code: Regex,
    lang: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        source_name: Regex::new(r"^(?i:adm)(\d)_([A-Za-z]{2})$").expect("valid regex"),
        canonical_name: Regex::new(r"^adm(\d)_name(\d*)$").expect("valid regex"),
        code: Regex::new(r"^(?i:adm)(\d)_(?i:pcode)$").expect("valid regex"),
        lang: Regex::new(r"^lang(\d*)$").expect("valid regex"),
    })
}

fn slot_of(digits: &str) -> Option<usize> {
    if digits.is_empty() {
        Some(0)
    } else {
        digits.parse().ok()
    }
}

/// Classify a single column name.
pub fn classify(column: &str) -> ColumnRole {
    let p = patterns();
    if let Some(caps) = p.code.captures(column) {
        if let Ok(level) = caps[1].parse() {
            return ColumnRole::Code { level };
        }
    }
    if let Some(caps) = p.canonical_name.captures(column) {
        if let (Ok(level), Some(slot)) = (caps[1].parse(), slot_of(&caps[2])) {
            return ColumnRole::Name {
                level,
                lang: None,
                slot: Some(slot),
            };
        }
    }
    if let Some(caps) = p.source_name.captures(column) {
        if let Ok(level) = caps[1].parse() {
            return ColumnRole::Name {
                level,
                lang: Some(caps[2].to_lowercase()),
                slot: None,
            };
        }
    }
    if let Some(caps) = p.lang.captures(column) {
        if let Some(slot) = slot_of(&caps[1]) {
            return ColumnRole::Lang { slot };
        }
    }
    match column.to_lowercase().as_str() {
        "date" => ColumnRole::Date,
        "validon" => ColumnRole::ValidOn,
        "validto" => ColumnRole::ValidTo,
        "area_sqkm" => ColumnRole::Area,
        _ => ColumnRole::Other,
    }
}

/// Ordered (column, role) list for one layer
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    entries: Vec<(String, ColumnRole)>,
}

impl SchemaDescriptor {
    pub fn describe(columns: &[String]) -> Self {
        Self {
            entries: columns.iter().map(|c| (c.clone(), classify(c))).collect(),
        }
    }

    pub fn entries(&self) -> &[(String, ColumnRole)] {
        &self.entries
    }

    /// Name columns of one level, in column order.
    pub fn name_columns(&self, level: u8) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, role)| matches!(role, ColumnRole::Name { level: l, .. } if *l == level))
            .map(|(c, _)| c.as_str())
            .collect()
    }

    /// Source-style name columns of one level with their language.
    pub fn language_columns(&self, level: u8) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(c, role)| match role {
                ColumnRole::Name {
                    level: l,
                    lang: Some(lang),
                    ..
                } if *l == level => Some((c.as_str(), lang.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn code_column(&self, level: u8) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, role)| *role == ColumnRole::Code { level })
            .map(|(c, _)| c.as_str())
    }

    /// Language-slot columns ordered by slot.
    pub fn lang_columns(&self) -> Vec<&str> {
        let mut langs: Vec<(usize, &str)> = self
            .entries
            .iter()
            .filter_map(|(c, role)| match role {
                ColumnRole::Lang { slot } => Some((*slot, c.as_str())),
                _ => None,
            })
            .collect();
        langs.sort_by_key(|(slot, _)| *slot);
        langs.into_iter().map(|(_, c)| c).collect()
    }

    /// First column with the given role.
    pub fn column_for(&self, role: &ColumnRole) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, r)| r == role)
            .map(|(c, _)| c.as_str())
    }

    /// Distinct source-style languages of `level`'s own name columns, in
    /// column order. Coarser levels never contribute a language.
    pub fn languages(&self, level: u8) -> Vec<String> {
        let mut langs: Vec<String> = Vec::new();
        for (_, role) in &self.entries {
            if let ColumnRole::Name {
                level: l,
                lang: Some(lang),
                ..
            } = role
            {
                if *l == level && !langs.contains(lang) {
                    langs.push(lang.clone());
                }
            }
        }
        langs
    }

    /// Number of language slots already in canonical form.
    pub fn slot_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|(_, role)| match role {
                ColumnRole::Lang { slot } => Some(slot + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Whether code columns use the upper-case source convention.
    pub fn uses_upper_case(&self) -> bool {
        self.entries
            .iter()
            .any(|(c, role)| matches!(role, ColumnRole::Code { .. }) && c.starts_with("ADM"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_source_columns() {
        assert_eq!(classify("ADM1_PCODE"), ColumnRole::Code { level: 1 });
        assert_eq!(
            classify("ADM2_FR"),
            ColumnRole::Name {
                level: 2,
                lang: Some("fr".to_string()),
                slot: None
            }
        );
        assert_eq!(classify("validOn"), ColumnRole::ValidOn);
        assert_eq!(classify("AREA_SQKM"), ColumnRole::Area);
        assert_eq!(classify("ADM1_REF"), ColumnRole::Other);
    }

    #[test]
    fn test_canonical_columns_are_not_languages() {
        assert_eq!(
            classify("adm1_name"),
            ColumnRole::Name {
                level: 1,
                lang: None,
                slot: Some(0)
            }
        );
        assert_eq!(
            classify("adm1_name2"),
            ColumnRole::Name {
                level: 1,
                lang: None,
                slot: Some(2)
            }
        );
        assert_eq!(classify("lang1"), ColumnRole::Lang { slot: 1 });
        assert_eq!(classify("adm0_pcode"), ColumnRole::Code { level: 0 });
    }

    #[test]
    fn test_languages_in_first_appearance_order() {
        let d = SchemaDescriptor::describe(&cols(&[
            "ADM2_FR", "ADM2_EN", "ADM1_EN", "ADM1_AR", "ADM3_ES", "ADM1_PCODE",
        ]));
        assert_eq!(d.languages(2), vec!["fr", "en"]);
        assert_eq!(d.languages(1), vec!["en", "ar"]);
        assert!(d.languages(0).is_empty());
        assert_eq!(d.code_column(1), Some("ADM1_PCODE"));
        assert!(d.uses_upper_case());
    }

    #[test]
    fn test_lang_columns_sorted_by_slot() {
        let d = SchemaDescriptor::describe(&cols(&["lang2", "lang", "lang1", "adm0_pcode"]));
        assert_eq!(d.lang_columns(), vec!["lang", "lang1", "lang2"]);
        assert_eq!(d.slot_count(), 3);
        assert!(!d.uses_upper_case());
    }
}
