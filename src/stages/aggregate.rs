//! Hierarchical aggregation.
//!
//! Starting from a country's finest layer, every coarser level is built by
//! dissolving the previous result on that level's code. Attributes come from
//! the first row of each group and area is measured again for every group in
//! the equal-area grid its latitude span calls for.

use geo::Geometry;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::Result;
use crate::geometry::{ease_grid_for, latitude_extent, to_multi_polygon, GeometryEngine};
use crate::models::{AdminLevel, ColumnRole, Feature, FeatureLayer, SchemaDescriptor, Value};

/// Naming convention of the layer being aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStyle {
    /// `ADM1_EN`, `ADM1_PCODE`, `validOn`, `AREA_SQKM`
    Source,
    /// `adm1_name`, `adm1_pcode`, `lang`, `validon`, `area_sqkm`
    Canonical,
}

impl ColumnStyle {
    fn upper(self) -> bool {
        self == ColumnStyle::Source
    }

    fn trailing_columns(self) -> [&'static str; 4] {
        match self {
            ColumnStyle::Source => ["date", "validOn", "validTo", "AREA_SQKM"],
            ColumnStyle::Canonical => ["date", "validon", "validto", "area_sqkm"],
        }
    }

    pub fn area_column(self) -> &'static str {
        self.trailing_columns()[3]
    }
}

/// Columns kept for `level`: names and code of that level and every coarser
/// one, language slots, then dates and area.
pub fn output_columns(
    schema: &SchemaDescriptor,
    level: AdminLevel,
    style: ColumnStyle,
) -> Vec<String> {
    let mut columns = Vec::new();
    for l in level.descending() {
        for (column, role) in schema.entries() {
            let keep = match (style, role) {
                (
                    ColumnStyle::Source,
                    ColumnRole::Name {
                        level: n,
                        lang: Some(_),
                        ..
                    },
                ) => *n == l.get() && column.starts_with("ADM"),
                (
                    ColumnStyle::Canonical,
                    ColumnRole::Name {
                        level: n,
                        slot: Some(_),
                        ..
                    },
                ) => *n == l.get(),
                _ => false,
            };
            if keep {
                columns.push(column.clone());
            }
        }
        columns.push(l.code_column(style.upper()));
    }
    if style == ColumnStyle::Canonical {
        columns.extend(schema.lang_columns().into_iter().map(str::to_string));
    }
    columns.extend(style.trailing_columns().iter().map(|c| c.to_string()));
    columns
}

/// Group key of a value: integral numbers compare equal whatever their type.
pub(crate) fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::Real(_) | Value::Int(_) => value
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| value.key()),
        other => other.key(),
    }
}

/// Row indices grouped by the values of `keys`, groups in order of first
/// occurrence. Rows with a null key are left out and counted.
pub(crate) fn group_rows(layer: &FeatureLayer, keys: &[usize]) -> (Vec<Vec<usize>>, usize) {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut skipped = 0;
    for (row, feature) in layer.features().iter().enumerate() {
        let key: Option<Vec<String>> = keys
            .iter()
            .map(|&k| group_key(&feature.properties[k]))
            .collect();
        let Some(key) = key else {
            skipped += 1;
            continue;
        };
        match index.get(&key) {
            Some(&g) => groups[g].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    (groups, skipped)
}

/// Union the polygons of rows sharing `key_column`, keeping first-row
/// attributes and measuring each group's area into `area_column`.
pub fn dissolve_by(
    layer: &FeatureLayer,
    key_column: &str,
    area_column: &str,
    engine: &dyn GeometryEngine,
) -> Result<FeatureLayer> {
    let key = layer.require(key_column, "dissolve")?;
    let (groups, skipped) = group_rows(layer, &[key]);
    if skipped > 0 {
        warn!("Dropped {} rows without a {} value", skipped, key_column);
    }

    let mut out = FeatureLayer::new(layer.columns().to_vec(), layer.crs());
    let area = match out.column_index(area_column) {
        Some(idx) => idx,
        None => out.fill_column(area_column, Value::Null),
    };

    for rows in groups {
        let shapes: Vec<_> = rows
            .iter()
            .filter_map(|&r| to_multi_polygon(&layer.features()[r].geometry))
            .collect();
        if shapes.is_empty() {
            warn!(
                "Group {:?} of {} has no polygons, dropped",
                layer.features()[rows[0]].properties[key],
                key_column
            );
            continue;
        }
        let merged = engine.dissolve(&shapes);
        let mut properties = layer.features()[rows[0]].properties.clone();
        properties.resize(out.columns().len(), Value::Null);
        properties[area] = match latitude_extent(&merged) {
            Some((min_lat, max_lat)) => {
                let grid = ease_grid_for(min_lat, max_lat);
                Value::Real(engine.area_km2(&merged, grid)?)
            }
            None => Value::Real(0.0),
        };
        out.push(Feature::new(properties, Geometry::MultiPolygon(merged)));
    }
    Ok(out)
}

/// Parent codes referenced by `child` that `parent` does not contain.
pub fn verify_hierarchy(
    child: &FeatureLayer,
    parent: &FeatureLayer,
    parent_level: AdminLevel,
) -> Result<Vec<String>> {
    let code = |layer: &FeatureLayer| -> Result<usize> {
        let schema = SchemaDescriptor::describe(layer.columns());
        let column = schema
            .code_column(parent_level.get())
            .map(str::to_string)
            .unwrap_or_else(|| parent_level.code_column(false));
        layer.require(&column, "hierarchy check")
    };
    let in_child = code(child)?;
    let in_parent = code(parent)?;

    let known: HashSet<String> = parent
        .features()
        .iter()
        .filter_map(|f| group_key(&f.properties[in_parent]))
        .collect();
    let mut orphans: Vec<String> = Vec::new();
    for feature in child.features() {
        match group_key(&feature.properties[in_child]) {
            Some(k) if known.contains(&k) => {}
            Some(k) => {
                if !orphans.contains(&k) {
                    orphans.push(k);
                }
            }
            None => orphans.push(String::new()),
        }
    }
    Ok(orphans)
}

/// Aggregate `layer` from `finest` down to the country level, handing every
/// produced level to `sink`.
pub fn aggregate<F>(
    layer: FeatureLayer,
    finest: AdminLevel,
    style: ColumnStyle,
    engine: &dyn GeometryEngine,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(AdminLevel, &FeatureLayer) -> Result<()>,
{
    let mut current = layer;
    let mut written = 0;
    for level in finest.descending() {
        let schema = SchemaDescriptor::describe(current.columns());
        let columns = output_columns(&schema, level, style);
        let code_column = level.code_column(style.upper());

        let dissolved = dissolve_by(&current, &code_column, style.area_column(), engine)?;
        let mut selected = dissolved.select(&columns)?;
        let code = selected.require(&code_column, "sort")?;
        selected.sort_by_column(code);

        if level != finest {
            let orphans = verify_hierarchy(&current, &selected, level)?;
            if !orphans.is_empty() {
                warn!("{} units reference missing {} codes: {:?}", orphans.len(), level, orphans);
            }
        }

        debug!("Aggregated {} into {} units", level, selected.len());
        sink(level, &selected)?;
        written += 1;
        current = selected;
    }
    Ok(written)
}
