//! Extension and splitting of unified layers.

use tracing::{info, warn};

use super::normalize::reproject_layer;
use crate::error::Result;
use crate::io::{save, SourceResolver, StageArea};
use crate::models::{Country, FeatureLayer, Value};
use crate::pipeline::PipelineContext;
use crate::rules::SplitSpec;

const VALID_TO: &str = "validto";

/// Layers produced by `spec`, one per named filter.
pub fn split_layer(layer: &FeatureLayer, spec: &SplitSpec) -> Result<Vec<(String, FeatureLayer)>> {
    let code_column = spec.adm.code_column(false);
    let idx = layer.require(&code_column, "split")?;
    Ok(spec
        .layers
        .iter()
        .map(|part| {
            let subset = layer.filtered(|f| part.filter.matches(f.properties[idx].key().as_deref()));
            (part.name.clone(), subset)
        })
        .collect())
}

/// Merge supplementary polygons into the finest unified layer, then write it
/// whole or split into named layers.
pub fn extend(ctx: &PipelineContext, country: &Country) -> Result<usize> {
    let config = &ctx.config;
    let iso3 = country.iso3.as_str();
    let resolver = SourceResolver::new(vec![config.area_dir(StageArea::Unified)]);
    let Some((level, mut layer)) = resolver.finest_level(iso3, ctx.max_level())? else {
        return Ok(0);
    };

    let additions = SourceResolver::new(vec![config.source_dir(&config.sources.additions)]);
    if let Some(mut extra) = additions.read(iso3, level)? {
        reproject_layer(&mut extra, ctx.engine())?;
        info!("{}: adding {} supplementary features at {}", iso3, extra.len(), level);
        layer.concat(extra);
        layer.fill_column(VALID_TO, Value::Null);
    }

    let out = config.area_dir(StageArea::Extended);
    match ctx.rules.get(iso3).and_then(|r| r.split()) {
        Some(spec) => {
            let parts = split_layer(&layer, spec)?;
            for (name, part) in &parts {
                if part.is_empty() {
                    warn!("{}: split layer {} is empty", iso3, name);
                }
                save(&out, name, Some(level), part)?;
            }
            Ok(parts.len())
        }
        None => {
            save(&out, iso3, Some(level), &layer)?;
            Ok(1)
        }
    }
}
