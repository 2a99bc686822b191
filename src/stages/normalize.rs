//! Raw intake and normalization.

use tracing::{debug, warn};

use super::aggregate::{aggregate, ColumnStyle};
use crate::error::Result;
use crate::geometry::{Crs, GeometryEngine};
use crate::io::{save, SourceResolver, StageArea};
use crate::models::{Country, FeatureLayer, Value, WGS84};
use crate::names::normalize_names;
use crate::pipeline::PipelineContext;
use crate::rules::apply_fixes;

const VALID_TO: &str = "validTo";

/// Copy every available level of a country, reopening `validTo`.
pub fn raw_intake(ctx: &PipelineContext, country: &Country) -> Result<usize> {
    let config = &ctx.config;
    let resolver = SourceResolver::new(config.source_dirs(&config.sources.raw));
    let out = config.area_dir(StageArea::RawCleaned);

    let mut written = 0;
    for level in ctx.max_level().descending() {
        let Some(mut layer) = resolver.read(&country.iso3, level)? else {
            continue;
        };
        if layer.has_column(VALID_TO) {
            layer.fill_column(VALID_TO, Value::Null);
        }
        save(&out, &country.iso3, Some(level), &layer)?;
        written += 1;
    }
    Ok(written)
}

/// Reproject every geometry to WGS84. Features that cannot be converted are
/// dropped with a warning.
pub fn reproject_layer(layer: &mut FeatureLayer, engine: &dyn GeometryEngine) -> Result<()> {
    let from = Crs::from_epsg(layer.crs())?;
    if from == Crs::Wgs84 {
        return Ok(());
    }
    let mut dropped = 0;
    let features = layer.take_features();
    for mut feature in features {
        match engine.reproject(&feature.geometry, from, Crs::Wgs84) {
            Ok(geometry) => {
                feature.geometry = geometry;
                layer.push(feature);
            }
            Err(e) => {
                debug!("Reprojection failed: {}", e);
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!("Dropped {} features that could not be reprojected", dropped);
    }
    layer.set_crs(WGS84);
    Ok(())
}

/// Bring a layer to WGS84, repair geometry and reopen its validity end.
pub fn normalize_geometry(layer: &mut FeatureLayer, engine: &dyn GeometryEngine) -> Result<()> {
    reproject_layer(layer, engine)?;

    let mut dropped = 0;
    let features = layer.take_features();
    for mut feature in features {
        match engine.repair_validity(&feature.geometry) {
            Ok(Some(geometry)) => {
                feature.geometry = geometry;
                layer.push(feature);
            }
            Ok(None) => dropped += 1,
            Err(e) => {
                warn!("Geometry repair failed: {}", e);
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!("Dropped {} features with empty or unusable geometry", dropped);
    }

    let stale: Vec<String> = layer
        .columns()
        .iter()
        .filter(|c| c.eq_ignore_ascii_case(VALID_TO))
        .cloned()
        .collect();
    for column in stale {
        layer.drop_column(&column);
    }
    layer.fill_column(VALID_TO, Value::Null);
    Ok(())
}

/// Fix, clean, name and aggregate a country's finest source layer.
pub fn normalize(ctx: &PipelineContext, country: &Country) -> Result<usize> {
    let config = &ctx.config;
    let iso3 = country.iso3.as_str();
    let rules = ctx.rules.for_country(iso3);
    let resolver = SourceResolver::new(config.source_dirs(&config.sources.normalize));

    let found = match rules.level {
        Some(level) => resolver.read(iso3, level)?.map(|layer| (level, layer)),
        None => resolver.finest_level(iso3, ctx.max_level())?,
    };
    let Some((level, mut layer)) = found else {
        return Ok(0);
    };
    debug!("{}: normalizing {} ({} features)", iso3, level, layer.len());

    apply_fixes(&mut layer, &rules)?;
    normalize_geometry(&mut layer, ctx.engine())?;
    normalize_names(&mut layer, country, level, &ctx.names, &rules)?;

    let out = config.area_dir(StageArea::Normalized);
    aggregate(layer, level, ColumnStyle::Source, ctx.engine(), |l, layer| {
        save(&out, iso3, Some(l), layer)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{to_multi_polygon, GeoEngine};
    use crate::models::Feature;
    use geo::{point, polygon, Area, Geometry};

    #[test]
    fn test_normalize_geometry() {
        let engine = GeoEngine::new();
        let mut layer = FeatureLayer::with_features(
            vec!["ADM1_PCODE".to_string(), "VALIDTO".to_string(), "ValidTo".to_string()],
            3857,
            vec![
                Feature::new(
                    vec![Value::from("A"), Value::from("2020-01-01"), Value::Null],
                    Geometry::Polygon(polygon![
                        (x: 0.0, y: 0.0),
                        (x: 200_000.0, y: 200_000.0),
                        (x: 200_000.0, y: 0.0),
                        (x: 0.0, y: 200_000.0),
                        (x: 0.0, y: 0.0),
                    ]),
                ),
                Feature::new(
                    vec![Value::from("B"), Value::Null, Value::Null],
                    Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 0.0)]),
                ),
            ],
        );
        normalize_geometry(&mut layer, &engine).unwrap();

        assert_eq!(layer.crs(), WGS84);
        assert_eq!(layer.columns(), &["ADM1_PCODE".to_string(), "validTo".to_string()]);
        assert_eq!(layer.len(), 1);
        let shape = to_multi_polygon(&layer.features()[0].geometry).unwrap();
        assert!(shape.unsigned_area() > 0.0);
        assert!(layer.features()[0].properties[1].is_null());
    }

    #[test]
    fn test_unsupported_crs_is_an_error() {
        let engine = GeoEngine::new();
        let mut layer = FeatureLayer::with_features(
            vec![],
            2154,
            vec![Feature::new(vec![], Geometry::Point(point!(x: 0.0, y: 0.0)))],
        );
        assert!(reproject_layer(&mut layer, &engine).is_err());
    }
}
