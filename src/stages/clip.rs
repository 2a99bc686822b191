//! Edge matching against the global reference boundaries.
//!
//! Polygons of every level and the derived lines are clipped to the
//! country's reference outline. Final lines combine the reference's own
//! boundary lines for the country with the clipped derived ones.

use geo::{Geometry, MultiLineString, MultiPolygon};
use tracing::{debug, info, warn};

use super::aggregate::{group_key, group_rows};
use crate::config::ReferenceConfig;
use crate::error::Result;
use crate::geometry::{is_empty, to_multi_line_string, to_multi_polygon, GeometryEngine};
use crate::io::{artifact_file_name, read_layer, save, SourceResolver, StageArea};
use crate::models::{Country, Feature, FeatureLayer, Value};
use crate::pipeline::PipelineContext;

/// Reference data shared by every country of a clipping stage
#[derive(Debug, Default)]
pub struct References {
    standard: Option<FeatureLayer>,
    disputed: Option<FeatureLayer>,
    /// Reference lines dissolved by (type, country)
    lines: Option<FeatureLayer>,
}

fn load_optional(ctx: &PipelineContext, name: &str) -> Result<Option<FeatureLayer>> {
    let path = ctx.config.paths.reference.join(artifact_file_name(name, None));
    if !path.is_file() {
        warn!("Reference dataset {} not found", path.display());
        return Ok(None);
    }
    let layer = read_layer(&path)?;
    info!("Loaded reference {} ({} features)", name, layer.len());
    Ok(Some(layer))
}

impl References {
    pub fn load(ctx: &PipelineContext, with_lines: bool) -> Result<Self> {
        let reference = &ctx.config.reference;
        let standard = load_optional(ctx, &reference.standard_mask)?;
        let disputed = load_optional(ctx, &reference.disputed_mask)?;
        let lines = if with_lines {
            match load_optional(ctx, &reference.lines)? {
                Some(raw) => Some(prepare_reference_lines(raw, reference, ctx.engine())?),
                None => None,
            }
        } else {
            None
        };
        Ok(Self {
            standard,
            disputed,
            lines,
        })
    }

    /// Union of the mask rows of `country`; `None` when the reference has
    /// nothing for it.
    pub fn mask_for(
        &self,
        country: &Country,
        reference: &ReferenceConfig,
        engine: &dyn GeometryEngine,
    ) -> Result<Option<MultiPolygon<f64>>> {
        let source = if country.is_synthetic() {
            &self.disputed
        } else {
            &self.standard
        };
        let Some(layer) = source else {
            return Ok(None);
        };
        let code = layer.require(&reference.code_column, "mask")?;
        let shapes: Vec<MultiPolygon<f64>> = layer
            .features()
            .iter()
            .filter(|f| f.properties[code].as_str() == Some(country.iso3.as_str()))
            .filter_map(|f| to_multi_polygon(&f.geometry))
            .collect();
        if shapes.is_empty() {
            return Ok(None);
        }
        let mask = engine.dissolve(&shapes);
        Ok((!mask.0.is_empty()).then_some(mask))
    }

    /// Reference lines whose country code mentions `iso3`.
    pub fn lines_for(&self, iso3: &str, reference: &ReferenceConfig) -> Result<Option<FeatureLayer>> {
        let Some(lines) = &self.lines else {
            return Ok(None);
        };
        let code = lines.require(&reference.code_column, "reference lines")?;
        Ok(Some(lines.filtered(|f| {
            f.properties[code].as_str().is_some_and(|c| c.contains(iso3))
        })))
    }
}

/// Merge the geometries of rows sharing every `keys` column into one line
/// feature, keeping first-row attributes.
pub fn dissolve_lines_by(
    layer: &FeatureLayer,
    keys: &[&str],
    engine: &dyn GeometryEngine,
) -> Result<FeatureLayer> {
    let indices = keys
        .iter()
        .map(|k| layer.require(k, "line dissolve"))
        .collect::<Result<Vec<_>>>()?;
    let (groups, skipped) = group_rows(layer, &indices);
    if skipped > 0 {
        warn!("Dropped {} lines without {:?}", skipped, keys);
    }

    let mut out = FeatureLayer::new(layer.columns().to_vec(), layer.crs());
    for rows in groups {
        let parts: Vec<MultiLineString<f64>> = rows
            .iter()
            .filter_map(|&r| to_multi_line_string(&layer.features()[r].geometry))
            .collect();
        let merged = engine.dissolve_lines(&parts);
        if merged.0.is_empty() {
            continue;
        }
        out.push(Feature::new(
            layer.features()[rows[0]].properties.clone(),
            Geometry::MultiLineString(merged),
        ));
    }
    Ok(out)
}

/// Reference lines ready for matching: missing codes become empty, excluded
/// types are removed and rows are dissolved by (type, country).
pub fn prepare_reference_lines(
    raw: FeatureLayer,
    reference: &ReferenceConfig,
    engine: &dyn GeometryEngine,
) -> Result<FeatureLayer> {
    let columns = vec![reference.type_column.clone(), reference.code_column.clone()];
    let mut lines = raw.select(&columns)?;
    lines.map_column(1, |value| {
        if value.is_null() {
            *value = Value::text("");
        }
    });
    lines.retain(|f| {
        !f.properties[0]
            .as_i64()
            .is_some_and(|t| reference.excluded_types.contains(&t))
    });
    dissolve_lines_by(&lines, &[&reference.type_column, &reference.code_column], engine)
}

/// Keep the first row of every (type, country) pair.
pub fn dedupe_lines(layer: &mut FeatureLayer, reference: &ReferenceConfig) -> Result<()> {
    let kind = layer.require(&reference.type_column, "dedupe")?;
    let code = layer.require(&reference.code_column, "dedupe")?;
    let mut seen = hashbrown::HashSet::new();
    layer.retain(|f| {
        seen.insert((
            group_key(&f.properties[kind]),
            group_key(&f.properties[code]),
        ))
    });
    Ok(())
}

/// Clip every polygon level of a country to its reference outline.
pub fn clip_polygons(ctx: &PipelineContext, refs: &References, country: &Country) -> Result<usize> {
    let iso3 = country.iso3.as_str();
    let resolver = SourceResolver::new(vec![ctx.config.area_dir(StageArea::Aggregated)]);
    let out = ctx.config.area_dir(StageArea::EdgeMatched);
    let engine = ctx.engine();

    // Loaded on the first level found
    let mut outline: Option<MultiPolygon<f64>> = None;
    let mut written = 0;
    for level in ctx.max_level().descending() {
        let Some(mut layer) = resolver.read(iso3, level)? else {
            continue;
        };
        if outline.is_none() {
            outline = refs.mask_for(country, &ctx.config.reference, engine)?;
        }
        let Some(mask) = outline.as_ref() else {
            warn!("{}: no reference outline, skipping edge matching", iso3);
            return Ok(0);
        };

        let before = layer.len();
        for feature in layer.features_mut() {
            if let Some(shape) = to_multi_polygon(&feature.geometry) {
                feature.geometry = Geometry::MultiPolygon(engine.clip_polygons(&shape, mask));
            }
        }
        layer.retain(|f| !is_empty(&f.geometry));
        if layer.len() < before {
            debug!(
                "{}: {} units fell outside the outline at {}",
                iso3,
                before - layer.len(),
                level
            );
        }
        save(&out, iso3, Some(level), &layer)?;
        written += 1;
    }
    Ok(written)
}

/// Clip derived lines and merge them with the reference lines.
pub fn clip_lines(ctx: &PipelineContext, refs: &References, country: &Country) -> Result<usize> {
    let iso3 = country.iso3.as_str();
    let reference = &ctx.config.reference;
    let engine = ctx.engine();
    let resolver = SourceResolver::new(vec![ctx.config.area_dir(StageArea::AggregatedLines)]);
    let Some(mut derived) = resolver.read_named(iso3, None)? else {
        return Ok(0);
    };
    let Some(mask) = refs.mask_for(country, reference, engine)? else {
        warn!("{}: no reference outline, skipping line matching", iso3);
        return Ok(0);
    };

    for feature in derived.features_mut() {
        if let Some(lines) = to_multi_line_string(&feature.geometry) {
            feature.geometry = Geometry::MultiLineString(engine.clip_lines(&lines, &mask));
        }
    }
    derived.retain(|f| !is_empty(&f.geometry));
    let derived = dissolve_lines_by(
        &derived,
        &[&reference.type_column, &reference.code_column],
        engine,
    )?;

    let mut combined = match refs.lines_for(iso3, reference)? {
        Some(authoritative) => authoritative,
        None => FeatureLayer::new(derived.columns().to_vec(), derived.crs()),
    };
    combined.concat(derived);
    dedupe_lines(&mut combined, reference)?;

    save(&ctx.config.area_dir(StageArea::EdgeMatchedLines), iso3, None, &combined)?;
    Ok(1)
}
