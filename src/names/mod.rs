//! Name tables and name cleanup.

mod tables;

pub use tables::{NameTable, NameTables};

use tracing::debug;

use crate::error::Result;
use crate::models::{AdminLevel, Country, FeatureLayer, SchemaDescriptor, Value};
use crate::rules::FixRuleSet;

/// Languages whose country names come from the reference tables
pub const OFFICIAL_LANGUAGES: [&str; 6] = ["ar", "en", "es", "fr", "ru", "zh"];

const APOSTROPHES: [char; 3] = ['\u{0060}', '\u{2019}', '\u{2032}'];
const HYPHENS: [char; 2] = ['\u{2010}', '\u{2011}'];
const INVISIBLE: [char; 8] = [
    '\u{0009}', '\u{000A}', '\u{000D}', '\u{00A0}', '\u{200C}', '\u{200E}', '\u{200F}', '\u{FEFF}',
];

/// Clean one name. Returns `None` when nothing but whitespace is left.
pub fn sanitize(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let c = if APOSTROPHES.contains(&c) {
            '\''
        } else if HYPHENS.contains(&c) {
            '-'
        } else {
            c
        };
        if INVISIBLE.contains(&c) {
            continue;
        }
        if c == ' ' && out.ends_with(' ') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Official short name of a country: the rule override first, then the
/// tables in priority order. Empty when nobody knows the name.
pub fn official_name(tables: &NameTables, rules: &FixRuleSet, iso3: &str, lang: &str) -> String {
    if let Some(name) = rules.official_name(lang).filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    tables.short_name(iso3, lang).unwrap_or_default().to_string()
}

/// Backfill root names, ensure the root code and clean every name column of
/// levels `level..=0`.
pub fn normalize_names(
    layer: &mut FeatureLayer,
    country: &Country,
    level: AdminLevel,
    tables: &NameTables,
    rules: &FixRuleSet,
) -> Result<()> {
    let schema = SchemaDescriptor::describe(layer.columns());
    let mut name_columns: Vec<(String, AdminLevel, String)> = Vec::new();
    for l in level.descending() {
        for (column, lang) in schema.language_columns(l.get()) {
            if column.starts_with("ADM") {
                name_columns.push((column.to_string(), l, lang.to_string()));
            }
        }
    }

    for (column, l, lang) in &name_columns {
        if *l != AdminLevel::COUNTRY || !OFFICIAL_LANGUAGES.contains(&lang.as_str()) {
            continue;
        }
        let name = official_name(tables, rules, &country.iso3, lang);
        if name.is_empty() {
            debug!("{}: no official {} name, keeping source values", country.iso3, lang);
            continue;
        }
        layer.fill_column(column, Value::Text(name));
    }

    let code_column = AdminLevel::COUNTRY.code_column(true);
    let idx = match layer.column_index(&code_column) {
        Some(idx) => idx,
        None => layer.fill_column(&code_column, Value::Null),
    };
    layer.map_column(idx, |value| {
        if value.is_null() {
            *value = Value::text(country.iso2.as_str());
        }
    });

    for (column, _, _) in &name_columns {
        let idx = layer.require(column, "name cleanup")?;
        layer.map_column(idx, |value| {
            if let Some(cleaned) = value.as_str().map(sanitize) {
                *value = cleaned.map_or(Value::Null, Value::Text);
            }
        });
    }

    // Any remaining blank text counts as missing.
    for idx in 0..layer.columns().len() {
        layer.map_column(idx, |value| {
            if value.as_str().is_some_and(|s| s.trim().is_empty()) {
                *value = Value::Null;
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, WGS84};
    use geo::{point, Geometry};

    #[test]
    fn test_sanitize() {
        assert_eq!(
            sanitize("Saint\u{2011}Étienne\u{200c} \u{00A0} Ville").as_deref(),
            Some("Saint-Étienne Ville")
        );
        assert_eq!(sanitize("Cote d\u{2019}Ivoire").as_deref(), Some("Cote d'Ivoire"));
        assert_eq!(sanitize("  \u{FEFF} \t"), None);
        assert_eq!(sanitize("a\u{000D}\u{000A}b"), Some("ab".to_string()));
    }

    fn layer() -> FeatureLayer {
        FeatureLayer::with_features(
            vec![
                "ADM1_EN".to_string(),
                "ADM1_PCODE".to_string(),
                "ADM0_EN".to_string(),
                "ADM0_PT".to_string(),
                "ADM0_FR".to_string(),
            ],
            WGS84,
            vec![Feature::new(
                vec![
                    Value::from(" North\u{00A0}  Province "),
                    Value::from("TS01"),
                    Value::from("Test Land"),
                    Value::from("Terra"),
                    Value::from("   "),
                ],
                Geometry::Point(point!(x: 0.0, y: 0.0)),
            )],
        )
    }

    #[test]
    fn test_normalize_names() {
        let tables = NameTables::from_tables(vec![NameTable::from_rows(
            "m49",
            vec![("TST", "en", "Testland"), ("TST", "fr", "")],
        )]);
        let country = Country::new("TS", "TST", "999", "Testland");
        let mut l = layer();
        normalize_names(
            &mut l,
            &country,
            AdminLevel::new(1).unwrap(),
            &tables,
            &FixRuleSet::empty("TST"),
        )
        .unwrap();

        let f = &l.features()[0];
        assert_eq!(l.value(f, "ADM0_EN"), Some(&Value::from("Testland")));
        // not an official language, kept as is
        assert_eq!(l.value(f, "ADM0_PT"), Some(&Value::from("Terra")));
        // empty table entry never overwrites, blank source becomes null
        assert_eq!(l.value(f, "ADM0_FR"), Some(&Value::Null));
        assert_eq!(l.value(f, "ADM1_EN"), Some(&Value::from("North Province")));
        assert_eq!(l.value(f, "ADM0_PCODE"), Some(&Value::from("TS")));
    }

    #[test]
    fn test_override_beats_tables() {
        let tables = NameTables::from_tables(vec![NameTable::from_rows(
            "m49",
            vec![("TST", "en", "Testland")],
        )]);
        let rules = crate::rules::RuleBook::from_json(
            r#"{"TST": {"names": {"en": "Republic of Test"}}}"#,
            std::path::Path::new("r.json"),
        )
        .unwrap()
        .for_country("TST");
        assert_eq!(official_name(&tables, &rules, "TST", "en"), "Republic of Test");
        assert_eq!(official_name(&tables, &rules, "ABC", "fr"), "");
    }
}
