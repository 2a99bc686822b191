//! Pipeline stages and the per-country runner.
//!
//! Every stage is a function of one country; [`run_stage`] fans countries out
//! over the rayon pool and collects their outcomes. A stage completes for all
//! countries before the next one starts, so artifacts written under another
//! country's code (split layers) are visible downstream.

pub mod aggregate;
pub mod clip;
pub mod extend;
pub mod lines;
pub mod normalize;
pub mod unify;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info};

use crate::io::{save, SourceResolver, StageArea};
use crate::models::Country;
use crate::pipeline::PipelineContext;
use aggregate::ColumnStyle;
use clip::References;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Copy raw source layers (`level-1`)
    Raw,
    /// Fix, clean, name and aggregate (`level-1a`)
    Normalize,
    /// Numbered name slots (`level-1b`)
    Unify,
    /// Supplementary polygons and splits (`extended/pre`)
    Extend,
    /// Aggregate extended or reviewed layers (`level-2`)
    Aggregate,
    /// Internal boundary lines (`level-2-lines`)
    Lines,
    /// Clip polygons to the reference outline (`level-3`)
    Clip,
    /// Clip lines and merge reference lines (`level-3-lines`)
    ClipLines,
}

impl Stage {
    /// Pipeline order
    pub const ALL: [Stage; 8] = [
        Stage::Raw,
        Stage::Normalize,
        Stage::Unify,
        Stage::Extend,
        Stage::Aggregate,
        Stage::Lines,
        Stage::Clip,
        Stage::ClipLines,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Normalize => "normalize",
            Stage::Unify => "unify",
            Stage::Extend => "extend",
            Stage::Aggregate => "aggregate",
            Stage::Lines => "lines",
            Stage::Clip => "clip",
            Stage::ClipLines => "clip-lines",
        }
    }

    /// Short label matching the output directory numbering
    pub fn label(self) -> &'static str {
        match self {
            Stage::Raw => "1",
            Stage::Normalize => "1a",
            Stage::Unify => "1b",
            Stage::Extend => "2a",
            Stage::Aggregate => "2b",
            Stage::Lines => "2l",
            Stage::Clip => "3",
            Stage::ClipLines => "3l",
        }
    }

    pub fn output(self) -> StageArea {
        match self {
            Stage::Raw => StageArea::RawCleaned,
            Stage::Normalize => StageArea::Normalized,
            Stage::Unify => StageArea::Unified,
            Stage::Extend => StageArea::Extended,
            Stage::Aggregate => StageArea::Aggregated,
            Stage::Lines => StageArea::AggregatedLines,
            Stage::Clip => StageArea::EdgeMatched,
            Stage::ClipLines => StageArea::EdgeMatchedLines,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s || stage.label() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Stage::ALL.iter().map(|stage| stage.name()).collect();
                format!("unknown stage '{}', expected one of {}", s, known.join(", "))
            })
    }
}

/// Result of one stage for one country
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Number of artifacts written
    Written(usize),
    NoData,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub outcomes: Vec<(String, Outcome)>,
}

impl StageReport {
    pub fn written(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Written(_)))
            .count()
    }

    pub fn no_data(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == Outcome::NoData)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(iso3, o)| match o {
            Outcome::Failed(e) => Some((iso3.as_str(), e.as_str())),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Aggregate the finest extended layer, preferring its reviewed copy.
pub fn aggregate_extended(ctx: &PipelineContext, country: &Country) -> crate::error::Result<usize> {
    let config = &ctx.config;
    let iso3 = country.iso3.as_str();
    let resolver = SourceResolver::new(vec![
        config.area_dir(StageArea::Reviewed),
        config.area_dir(StageArea::Extended),
    ]);
    let Some((level, layer)) = resolver.finest_level(iso3, ctx.max_level())? else {
        return Ok(0);
    };
    let out = config.area_dir(StageArea::Aggregated);
    aggregate::aggregate(layer, level, ColumnStyle::Canonical, ctx.engine(), |l, layer| {
        save(&out, iso3, Some(l), layer)
    })
}

fn run_country(
    ctx: &PipelineContext,
    stage: Stage,
    refs: &References,
    country: &Country,
) -> crate::error::Result<usize> {
    match stage {
        Stage::Raw => normalize::raw_intake(ctx, country),
        Stage::Normalize => normalize::normalize(ctx, country),
        Stage::Unify => unify::unify(ctx, country),
        Stage::Extend => extend::extend(ctx, country),
        Stage::Aggregate => aggregate_extended(ctx, country),
        Stage::Lines => lines::derive_lines(ctx, country),
        Stage::Clip => clip::clip_polygons(ctx, refs, country),
        Stage::ClipLines => clip::clip_lines(ctx, refs, country),
    }
}

/// Run one stage over `countries`. Country failures are logged and
/// reported, never propagated.
pub fn run_stage(ctx: &PipelineContext, stage: Stage, countries: &[&Country]) -> Result<StageReport> {
    info!("Stage {} ({}): {} countries", stage, stage.label(), countries.len());
    let refs = match stage {
        Stage::Clip => References::load(ctx, false)?,
        Stage::ClipLines => References::load(ctx, true)?,
        _ => References::default(),
    };

    let pb = ProgressBar::new(countries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
            )?
            .progress_chars("#>-"),
    );

    let outcomes: Vec<(String, Outcome)> = countries
        .par_iter()
        .map(|country| {
            let outcome = match run_country(ctx, stage, &refs, country) {
                Ok(0) => Outcome::NoData,
                Ok(n) => Outcome::Written(n),
                Err(e) => {
                    error!("{} failed for {}: {}", stage, country.iso3, e);
                    Outcome::Failed(e.to_string())
                }
            };
            pb.inc(1);
            (country.iso3.clone(), outcome)
        })
        .collect();
    pb.finish_and_clear();

    let report = StageReport { stage, outcomes };
    info!(
        "Stage {} done: {} written, {} without data, {} failed",
        stage,
        report.written(),
        report.no_data(),
        report.failures().count()
    );
    Ok(report)
}
