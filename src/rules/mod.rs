//! Declarative per-country corrections.
//!
//! The rule document is a JSON object keyed by iso3. Each entry is compiled
//! once at load time into a [`FixRuleSet`]: an optional admin-level override,
//! official-name overrides and a closed list of [`FixRule`] operations kept in
//! the order they are applied.

mod interpreter;

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::models::AdminLevel;

pub use interpreter::{apply_fixes, parse_date, title_case};

/// How a date column gets its values
#[derive(Debug, Clone, PartialEq)]
pub enum DateRule {
    /// Every row receives this date
    Fixed(NaiveDate),
    /// Parse the column's existing values
    FromColumn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// Replace nulls with this text
    FillNull(String),
    /// Literal substring replacement on text values
    Substring { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeFilter {
    In(Vec<String>),
    NotIn(Vec<String>),
}

impl CodeFilter {
    pub fn matches(&self, code: Option<&str>) -> bool {
        match self {
            CodeFilter::In(codes) => code.is_some_and(|c| codes.iter().any(|x| x == c)),
            CodeFilter::NotIn(codes) => !code.is_some_and(|c| codes.iter().any(|x| x == c)),
        }
    }
}

/// One named output of a split
#[derive(Debug, Clone, PartialEq)]
pub struct SplitLayer {
    pub name: String,
    pub filter: CodeFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitSpec {
    /// Level whose code column drives the filters
    pub adm: AdminLevel,
    pub layers: Vec<SplitLayer>,
}

/// A single correction, applied by [`apply_fixes`]
#[derive(Debug, Clone, PartialEq)]
pub enum FixRule {
    Drop(Vec<String>),
    /// `(target, source)` pairs
    Duplicate(Vec<(String, String)>),
    /// `(from, to)` pairs
    Rename(Vec<(String, String)>),
    TitleCase(Vec<String>),
    Replace(Vec<(String, Vec<Replacement>)>),
    DateOverride(DateRule),
    ValidityOverride(DateRule),
    Split(SplitSpec),
}

impl FixRule {
    pub fn name(&self) -> &'static str {
        match self {
            FixRule::Drop(_) => "drop",
            FixRule::Duplicate(_) => "duplicate",
            FixRule::Rename(_) => "rename",
            FixRule::TitleCase(_) => "title",
            FixRule::Replace(_) => "replace",
            FixRule::DateOverride(_) => "date",
            FixRule::ValidityOverride(_) => "update",
            FixRule::Split(_) => "split",
        }
    }
}

/// Compiled corrections for one country
#[derive(Debug, Clone, PartialEq)]
pub struct FixRuleSet {
    pub iso3: String,
    /// Read this level instead of the finest available one
    pub level: Option<AdminLevel>,
    /// Official root names by lower-case language code
    pub names: Vec<(String, String)>,
    pub rules: Vec<FixRule>,
}

impl FixRuleSet {
    /// Rule set of a country without configuration: dates are parsed from
    /// the data, nothing else changes.
    pub fn empty(iso3: &str) -> Self {
        Self {
            iso3: iso3.to_string(),
            level: None,
            names: Vec::new(),
            rules: vec![
                FixRule::DateOverride(DateRule::FromColumn),
                FixRule::ValidityOverride(DateRule::FromColumn),
            ],
        }
    }

    pub fn split(&self) -> Option<&SplitSpec> {
        self.rules.iter().find_map(|r| match r {
            FixRule::Split(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn official_name(&self, lang: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(lang))
            .map(|(_, n)| n.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleSet {
    level: Option<u8>,
    drop: Option<Vec<String>>,
    duplicate: Option<Map<String, JsonValue>>,
    rename: Option<Map<String, JsonValue>>,
    title: Option<Vec<String>>,
    replace: Option<Map<String, JsonValue>>,
    date: Option<String>,
    update: Option<String>,
    names: Option<Map<String, JsonValue>>,
    split: Option<RawSplit>,
}

#[derive(Debug, Deserialize)]
struct RawSplit {
    adm: u8,
    layers: Map<String, JsonValue>,
}

fn rule_error(iso3: &str, op: &'static str, reason: impl Into<String>) -> PipelineError {
    PipelineError::Rule {
        iso3: iso3.to_string(),
        op,
        reason: reason.into(),
    }
}

fn string_pairs(
    iso3: &str,
    op: &'static str,
    map: Map<String, JsonValue>,
) -> Result<Vec<(String, String)>> {
    map.into_iter()
        .map(|(k, v)| match v {
            JsonValue::String(s) => Ok((k, s)),
            other => Err(rule_error(
                iso3,
                op,
                format!("value for '{}' must be a string, got {}", k, other),
            )),
        })
        .collect()
}

fn fixed_date(iso3: &str, op: &'static str, raw: Option<String>) -> Result<DateRule> {
    match raw {
        Some(s) => parse_date(&s)
            .map(DateRule::Fixed)
            .ok_or_else(|| rule_error(iso3, op, format!("'{}' is not a date", s))),
        None => Ok(DateRule::FromColumn),
    }
}

fn compile_split(iso3: &str, raw: RawSplit) -> Result<SplitSpec> {
    let adm = AdminLevel::new(raw.adm)
        .ok_or_else(|| rule_error(iso3, "split", format!("level {} out of range", raw.adm)))?;
    let mut layers = Vec::with_capacity(raw.layers.len());
    for (name, spec) in raw.layers {
        let items = spec
            .as_array()
            .ok_or_else(|| rule_error(iso3, "split", format!("layer '{}' must be a list", name)))?;
        let mut strings = items.iter().map(|v| match v {
            JsonValue::String(s) => Ok(s.clone()),
            other => Err(rule_error(iso3, "split", format!("code {} must be a string", other))),
        });
        let switch = strings
            .next()
            .ok_or_else(|| rule_error(iso3, "split", format!("layer '{}' has no operator", name)))??;
        let codes = strings.collect::<Result<Vec<_>>>()?;
        let filter = match switch.as_str() {
            "==" => CodeFilter::In(codes),
            "!=" => CodeFilter::NotIn(codes),
            other => {
                return Err(rule_error(
                    iso3,
                    "split",
                    format!("unknown operator '{}' in layer '{}'", other, name),
                ))
            }
        };
        layers.push(SplitLayer { name, filter });
    }
    Ok(SplitSpec { adm, layers })
}

impl FixRuleSet {
    fn compile(iso3: &str, raw: RawRuleSet) -> Result<Self> {
        let level = match raw.level {
            Some(l) => Some(
                AdminLevel::new(l)
                    .ok_or_else(|| rule_error(iso3, "level", format!("level {} out of range", l)))?,
            ),
            None => None,
        };

        let mut rules = Vec::new();
        if let Some(columns) = raw.drop {
            rules.push(FixRule::Drop(columns));
        }
        if let Some(map) = raw.duplicate {
            rules.push(FixRule::Duplicate(string_pairs(iso3, "duplicate", map)?));
        }
        if let Some(map) = raw.rename {
            rules.push(FixRule::Rename(string_pairs(iso3, "rename", map)?));
        }
        if let Some(columns) = raw.title {
            rules.push(FixRule::TitleCase(columns));
        }
        if let Some(map) = raw.replace {
            let mut per_column = Vec::with_capacity(map.len());
            for (column, spec) in map {
                let JsonValue::Object(pairs) = spec else {
                    let reason = format!("'{}' must map keys to values", column);
                    return Err(rule_error(iso3, "replace", reason));
                };
                let replacements = string_pairs(iso3, "replace", pairs)?
                    .into_iter()
                    .map(|(from, to)| {
                        if from.is_empty() {
                            Replacement::FillNull(to)
                        } else {
                            Replacement::Substring { from, to }
                        }
                    })
                    .collect();
                per_column.push((column, replacements));
            }
            rules.push(FixRule::Replace(per_column));
        }
        rules.push(FixRule::DateOverride(fixed_date(iso3, "date", raw.date)?));
        rules.push(FixRule::ValidityOverride(fixed_date(iso3, "update", raw.update)?));
        if let Some(split) = raw.split {
            rules.push(FixRule::Split(compile_split(iso3, split)?));
        }

        let names = match raw.names {
            Some(map) => string_pairs(iso3, "names", map)?
                .into_iter()
                .map(|(lang, name)| (lang.to_lowercase(), name))
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            iso3: iso3.to_string(),
            level,
            names,
            rules,
        })
    }
}

/// All rule sets of a run, keyed by iso3
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    sets: HashMap<String, FixRuleSet>,
}

impl RuleBook {
    pub fn from_json(text: &str, source: &Path) -> Result<Self> {
        let raw: Map<String, JsonValue> =
            serde_json::from_str(text).map_err(|e| PipelineError::Decode {
                path: source.to_path_buf(),
                source: e,
            })?;
        let mut sets = HashMap::with_capacity(raw.len());
        for (iso3, value) in raw {
            let iso3 = iso3.to_uppercase();
            let parsed: RawRuleSet = serde_json::from_value(value)
                .map_err(|e| rule_error(&iso3, "parse", e.to_string()))?;
            sets.insert(iso3.clone(), FixRuleSet::compile(&iso3, parsed)?);
        }
        Ok(Self { sets })
    }

    /// Load the rule document; a missing file yields an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No rule file at {}, running without fixes", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let book = Self::from_json(&text, path)?;
        info!("Loaded fix rules for {} countries", book.len());
        Ok(book)
    }

    pub fn get(&self, iso3: &str) -> Option<&FixRuleSet> {
        self.sets.get(&iso3.to_uppercase())
    }

    /// Rule set of a country, or the empty set.
    pub fn for_country(&self, iso3: &str) -> FixRuleSet {
        self.get(iso3)
            .cloned()
            .unwrap_or_else(|| FixRuleSet::empty(iso3))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
