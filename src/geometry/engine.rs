//! [`GeometryEngine`] binding on top of the `geo` crate.

use geo::{
    unary_union, Area, BooleanOps, Coord, Geometry, LineString, MapCoords, MultiLineString,
    MultiPolygon, Polygon,
};

use super::lines;
use super::projection::Crs;
use super::{to_multi_line_string, to_multi_polygon, GeometryEngine};
use crate::error::{PipelineError, Result};

/// Default snapping tolerance for curve comparisons, in degrees (about 1 cm)
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

#[derive(Debug, Clone)]
pub struct GeoEngine {
    tolerance: f64,
}

impl Default for GeoEngine {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl GeoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

/// Drop repeated and non-finite coordinates and close the ring.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring.coords() {
        if !c.x.is_finite() || !c.y.is_finite() {
            continue;
        }
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if coords.len() >= 3 && coords.first() != coords.last() {
        coords.push(coords[0]);
    }
    (coords.len() >= 4).then(|| LineString::new(coords))
}

fn clean_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(clean_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

fn clean_line(line: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
    for c in line.coords() {
        if c.x.is_finite() && c.y.is_finite() && coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    (coords.len() >= 2).then(|| LineString::new(coords))
}

impl GeometryEngine for GeoEngine {
    fn repair_validity(&self, geometry: &Geometry<f64>) -> Result<Option<Geometry<f64>>> {
        if let Some(shape) = to_multi_polygon(geometry) {
            let cleaned = MultiPolygon::new(shape.iter().filter_map(clean_polygon).collect());
            if cleaned.0.is_empty() {
                return Ok(None);
            }
            // Overlaying against nothing rebuilds the rings, resolving
            // self-intersections and overlapping parts.
            let repaired = cleaned.union(&MultiPolygon::new(vec![]));
            let repaired = MultiPolygon::new(
                repaired
                    .into_iter()
                    .filter(|p| p.unsigned_area() > 0.0)
                    .collect(),
            );
            return Ok((!repaired.0.is_empty()).then_some(Geometry::MultiPolygon(repaired)));
        }
        if let Some(lines) = to_multi_line_string(geometry) {
            let cleaned: Vec<LineString<f64>> = lines.iter().filter_map(clean_line).collect();
            return Ok((!cleaned.is_empty())
                .then(|| Geometry::MultiLineString(MultiLineString::new(cleaned))));
        }
        match geometry {
            Geometry::Point(p) if p.x().is_finite() && p.y().is_finite() => {
                Ok(Some(geometry.clone()))
            }
            Geometry::Point(_) => Ok(None),
            other => Err(PipelineError::Geometry(format!(
                "cannot repair geometry of type {}",
                geometry_type(other)
            ))),
        }
    }

    fn reproject(&self, geometry: &Geometry<f64>, from: Crs, to: Crs) -> Result<Geometry<f64>> {
        if from == to {
            return Ok(geometry.clone());
        }
        if !from.is_invertible() {
            return Err(PipelineError::UnsupportedCrs(from.epsg()));
        }
        geometry.try_map_coords(|c| from.to_geographic(c).map(|g| to.from_geographic(g)))
    }

    fn area_km2(&self, shape: &MultiPolygon<f64>, projection: Crs) -> Result<f64> {
        let projected = shape.map_coords(|c| projection.from_geographic(c));
        Ok(projected.unsigned_area() / 1e6)
    }

    fn dissolve(&self, shapes: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
        unary_union(shapes)
    }

    fn dissolve_lines(&self, lines: &[MultiLineString<f64>]) -> MultiLineString<f64> {
        lines::dissolve_lines(lines)
    }

    fn clip_polygons(
        &self,
        shape: &MultiPolygon<f64>,
        mask: &MultiPolygon<f64>,
    ) -> MultiPolygon<f64> {
        shape.intersection(mask)
    }

    fn clip_lines(
        &self,
        lines: &MultiLineString<f64>,
        mask: &MultiPolygon<f64>,
    ) -> MultiLineString<f64> {
        mask.clip(lines, false)
    }

    fn boundary_of(&self, shape: &MultiPolygon<f64>) -> MultiLineString<f64> {
        lines::boundary_of(shape)
    }

    fn difference_boundary(
        &self,
        a: &MultiLineString<f64>,
        b: &MultiLineString<f64>,
    ) -> MultiLineString<f64> {
        lines::line_difference(a, b, self.tolerance)
    }
}

fn geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
