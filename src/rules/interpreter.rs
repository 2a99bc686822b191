//! Applies a [`FixRuleSet`] to a layer.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use super::{DateRule, FixRule, FixRuleSet, Replacement};
use crate::error::{PipelineError, Result};
use crate::models::{FeatureLayer, Value};

const DATE_COLUMN: &str = "date";
const VALID_ON_COLUMN: &str = "validOn";

/// Accepted textual date layouts, tried in order
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
    {
        return Some(date);
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
    {
        return Some(dt.date());
    }
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive())
}

/// Upper-case a letter that does not follow another letter, lower-case the
/// rest: `"saint-denis d'or"` becomes `"Saint-Denis D'Or"`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(c);
            previous_cased = false;
        }
    }
    out
}

/// Column lookup that reports the failing country and operation.
fn require(
    layer: &FeatureLayer,
    set: &FixRuleSet,
    op: &'static str,
    column: &str,
) -> Result<usize> {
    layer.column_index(column).ok_or_else(|| PipelineError::Rule {
        iso3: set.iso3.clone(),
        op,
        reason: format!("column '{}' not found", column),
    })
}

fn apply_date(
    layer: &mut FeatureLayer,
    set: &FixRuleSet,
    op: &'static str,
    column: &str,
    rule: &DateRule,
) -> Result<()> {
    match rule {
        DateRule::Fixed(date) => {
            layer.fill_column(column, Value::Date(*date));
        }
        DateRule::FromColumn => {
            let Some(idx) = layer.column_index(column) else {
                warn!("{}: no '{}' column to parse, leaving it empty", set.iso3, column);
                layer.fill_column(column, Value::Null);
                return Ok(());
            };
            let mut failure = None;
            layer.map_column(idx, |value| {
                let parsed = match &*value {
                    Value::Null | Value::Date(_) => return,
                    Value::Text(s) if s.trim().is_empty() => Value::Null,
                    Value::Text(s) => match parse_date(s) {
                        Some(date) => Value::Date(date),
                        None => {
                            failure.get_or_insert_with(|| s.clone());
                            return;
                        }
                    },
                    other => {
                        failure.get_or_insert_with(|| other.key().unwrap_or_default());
                        return;
                    }
                };
                *value = parsed;
            });
            if let Some(value) = failure {
                debug!("{}: {} failed on '{}'", set.iso3, op, value);
                return Err(PipelineError::Date {
                    column: column.to_string(),
                    value,
                });
            }
        }
    }
    Ok(())
}

/// Run every fix operation of `set` in order. Split rules are left to the
/// extension step.
pub fn apply_fixes(layer: &mut FeatureLayer, set: &FixRuleSet) -> Result<()> {
    for rule in &set.rules {
        let op = rule.name();
        match rule {
            FixRule::Drop(columns) => {
                for column in columns {
                    require(layer, set, op, column)?;
                    layer.drop_column(column);
                }
            }
            FixRule::Duplicate(pairs) => {
                for (target, source) in pairs {
                    require(layer, set, op, source)?;
                    layer.duplicate_column(source, target)?;
                }
            }
            FixRule::Rename(pairs) => {
                for (from, to) in pairs {
                    require(layer, set, op, from)?;
                    layer.rename_column(from, to)?;
                }
            }
            FixRule::TitleCase(columns) => {
                for column in columns {
                    let idx = require(layer, set, op, column)?;
                    layer.map_column(idx, |value| {
                        if let Value::Text(s) = value {
                            *s = title_case(s);
                        }
                    });
                }
            }
            FixRule::Replace(per_column) => {
                for (column, replacements) in per_column {
                    let idx = require(layer, set, op, column)?;
                    for replacement in replacements {
                        layer.map_column(idx, |value| match replacement {
                            Replacement::FillNull(fill) => {
                                if value.is_null() {
                                    *value = Value::text(fill.as_str());
                                }
                            }
                            Replacement::Substring { from, to } => {
                                if let Value::Text(s) = value {
                                    if s.contains(from.as_str()) {
                                        *s = s.replace(from.as_str(), to);
                                    }
                                }
                            }
                        });
                    }
                }
            }
            FixRule::DateOverride(date_rule) => {
                apply_date(layer, set, op, DATE_COLUMN, date_rule)?;
            }
            FixRule::ValidityOverride(date_rule) => {
                apply_date(layer, set, op, VALID_ON_COLUMN, date_rule)?;
            }
            FixRule::Split(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, WGS84};
    use crate::rules::RuleBook;
    use geo::{point, Geometry};
    use std::path::Path;

    fn layer() -> FeatureLayer {
        FeatureLayer::with_features(
            vec![
                "ADM1_NAME".to_string(),
                "ADM1_PCODE".to_string(),
                "Shape_Leng".to_string(),
                "date".to_string(),
                "validOn".to_string(),
            ],
            WGS84,
            vec![
                Feature::new(
                    vec![
                        Value::from("NORTH & SOUTH"),
                        Value::from("TS01"),
                        Value::Real(1.5),
                        Value::from("2020/03/01"),
                        Value::from("2021-06-30T00:00:00"),
                    ],
                    Geometry::Point(point!(x: 0.0, y: 0.0)),
                ),
                Feature::new(
                    vec![
                        Value::Null,
                        Value::from("TS02"),
                        Value::Real(2.5),
                        Value::from("01/03/2020"),
                        Value::Null,
                    ],
                    Geometry::Point(point!(x: 1.0, y: 0.0)),
                ),
            ],
        )
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("saint-denis d'or"), "Saint-Denis D'Or");
        assert_eq!(title_case("ÎLE DE FRANCE"), "Île De France");
        assert_eq!(title_case("adm2 north"), "Adm2 North");
    }

    #[test]
    fn test_parse_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 1);
        assert_eq!(parse_date("2020-03-01"), expected);
        assert_eq!(parse_date("2020/03/01"), expected);
        assert_eq!(parse_date("01/03/2020"), expected);
        assert_eq!(parse_date("2020-03-01 10:00:00"), expected);
        assert_eq!(parse_date("2020-03-01T10:00:00+02:00"), expected);
        assert_eq!(parse_date("March"), None);
    }

    #[test]
    fn test_apply_in_fixed_order() {
        // rename runs after duplicate, so the copy keeps the old name's data
        let doc = r#"{"TST": {
            "drop": ["Shape_Leng"],
            "duplicate": {"ADM1_REF": "ADM1_NAME"},
            "rename": {"ADM1_NAME": "ADM1_EN"},
            "title": ["ADM1_EN"],
            "replace": {"ADM1_EN": {"": "Unknown", "&": "and"}},
            "update": "2022-01-01"
        }}"#;
        let book = RuleBook::from_json(doc, Path::new("rules.json")).unwrap();
        let mut l = layer();
        apply_fixes(&mut l, book.get("TST").unwrap()).unwrap();

        assert!(!l.has_column("Shape_Leng"));
        assert!(!l.has_column("ADM1_NAME"));
        let f0 = &l.features()[0];
        let f1 = &l.features()[1];
        assert_eq!(l.value(f0, "ADM1_EN"), Some(&Value::from("North and South")));
        assert_eq!(l.value(f0, "ADM1_REF"), Some(&Value::from("NORTH & SOUTH")));
        assert_eq!(l.value(f1, "ADM1_EN"), Some(&Value::from("Unknown")));

        let march = Value::Date(NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
        assert_eq!(l.value(f0, "date"), Some(&march));
        assert_eq!(l.value(f1, "date"), Some(&march));
        let update = Value::Date(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert!(l.features().iter().all(|f| l.value(f, "validOn") == Some(&update)));
    }

    #[test]
    fn test_missing_column_names_country_and_op() {
        let book =
            RuleBook::from_json(r#"{"TST": {"title": ["ADM3_EN"]}}"#, Path::new("r.json")).unwrap();
        let mut l = layer();
        let err = apply_fixes(&mut l, book.get("TST").unwrap()).unwrap_err();
        match err {
            PipelineError::Rule { iso3, op, reason } => {
                assert_eq!(iso3, "TST");
                assert_eq!(op, "title");
                assert!(reason.contains("ADM3_EN"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_unparseable_date_is_an_error() {
        let mut l = layer();
        let idx = l.column_index("date").unwrap();
        l.features_mut()[0].properties[idx] = Value::from("sometime");
        let err = apply_fixes(&mut l, &FixRuleSet::empty("TST")).unwrap_err();
        assert!(matches!(err, PipelineError::Date { .. }));
    }
}
