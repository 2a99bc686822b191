//! Internal boundary lines of each admin level.

use geo::{Geometry, MultiLineString, MultiPolygon};
use tracing::{debug, warn};

use crate::error::Result;
use crate::geometry::{to_multi_polygon, GeometryEngine};
use crate::io::{save, SourceResolver, StageArea};
use crate::models::{AdminLevel, Country, Feature, FeatureLayer, Value, WGS84};
use crate::pipeline::PipelineContext;

/// Boundary type of lines first appearing at `level`
pub fn boundary_type(level: AdminLevel) -> i64 {
    10 + i64::from(level.get())
}

fn outlines(layer: &FeatureLayer, engine: &dyn GeometryEngine) -> MultiLineString<f64> {
    let shapes: Vec<MultiPolygon<f64>> = layer
        .features()
        .iter()
        .filter_map(|f| to_multi_polygon(&f.geometry))
        .collect();
    MultiLineString::new(
        shapes
            .iter()
            .flat_map(|shape| engine.boundary_of(shape).0)
            .collect(),
    )
}

/// Edges of `child` units that are not edges of their `parent` units,
/// merged into one curve set.
pub fn derive_level_lines(
    child: &FeatureLayer,
    parent: &FeatureLayer,
    engine: &dyn GeometryEngine,
) -> MultiLineString<f64> {
    let difference = engine.difference_boundary(&outlines(child, engine), &outlines(parent, engine));
    engine.dissolve_lines(&[difference])
}

pub fn derive_lines(ctx: &PipelineContext, country: &Country) -> Result<usize> {
    let iso3 = country.iso3.as_str();
    let reference = &ctx.config.reference;
    let resolver = SourceResolver::new(vec![ctx.config.area_dir(StageArea::Aggregated)]);

    let mut lines = FeatureLayer::new(
        vec![reference.type_column.clone(), reference.code_column.clone()],
        WGS84,
    );
    for level in ctx.max_level().descending() {
        let Some(parent_level) = level.parent() else {
            break;
        };
        let Some(child) = resolver.read(iso3, level)? else {
            continue;
        };
        let Some(parent) = resolver.read(iso3, parent_level)? else {
            warn!("{}: {} has no {} layer to compare against", iso3, level, parent_level);
            continue;
        };
        let derived = derive_level_lines(&child, &parent, ctx.engine());
        if derived.0.is_empty() {
            debug!("{}: no internal boundaries at {}", iso3, level);
            continue;
        }
        lines.push(Feature::new(
            vec![Value::Int(boundary_type(level)), Value::text(iso3)],
            Geometry::MultiLineString(derived),
        ));
    }

    if lines.is_empty() {
        return Ok(0);
    }
    save(&ctx.config.area_dir(StageArea::AggregatedLines), iso3, None, &lines)?;
    Ok(1)
}
