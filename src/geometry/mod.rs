//! Geometry engine capability.
//!
//! Stages never call geometric primitives directly; they go through
//! [`GeometryEngine`] so the sequence and grouping policy stays separate from
//! the computational geometry. [`GeoEngine`] binds it to the `geo` crate.

mod engine;
mod lines;
mod projection;

use geo::{BoundingRect, Geometry, MultiLineString, MultiPolygon};

use crate::error::Result;

pub use engine::{GeoEngine, DEFAULT_TOLERANCE};
pub use projection::{ease_grid_for, Crs, LATITUDE_EQUATOR, LATITUDE_POLES};

pub trait GeometryEngine: Send + Sync {
    /// Resolve self-intersections and degenerate parts; `None` when nothing
    /// remains.
    fn repair_validity(&self, geometry: &Geometry<f64>) -> Result<Option<Geometry<f64>>>;

    fn reproject(&self, geometry: &Geometry<f64>, from: Crs, to: Crs) -> Result<Geometry<f64>>;

    /// Area in km2 of a geographic shape measured in `projection`.
    fn area_km2(&self, shape: &MultiPolygon<f64>, projection: Crs) -> Result<f64>;

    /// Union of all shapes.
    fn dissolve(&self, shapes: &[MultiPolygon<f64>]) -> MultiPolygon<f64>;

    /// Union of curve sets, without repeated segments.
    fn dissolve_lines(&self, lines: &[MultiLineString<f64>]) -> MultiLineString<f64>;

    fn clip_polygons(&self, shape: &MultiPolygon<f64>, mask: &MultiPolygon<f64>)
        -> MultiPolygon<f64>;

    fn clip_lines(
        &self,
        lines: &MultiLineString<f64>,
        mask: &MultiPolygon<f64>,
    ) -> MultiLineString<f64>;

    fn boundary_of(&self, shape: &MultiPolygon<f64>) -> MultiLineString<f64>;

    /// Parts of curve set `a` that do not run along curve set `b`.
    fn difference_boundary(
        &self,
        a: &MultiLineString<f64>,
        b: &MultiLineString<f64>,
    ) -> MultiLineString<f64>;
}

/// Polygonal view of a geometry, `None` for non-areal types.
pub fn to_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<_> = gc
                .iter()
                .filter_map(to_multi_polygon)
                .flat_map(|mp| mp.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

/// Linear view of a geometry, `None` for non-linear types.
pub fn to_multi_line_string(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::Line(l) => Some(MultiLineString::new(vec![(*l).into()])),
        Geometry::LineString(ls) => Some(MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(mls) => Some(mls.clone()),
        Geometry::GeometryCollection(gc) => {
            let lines: Vec<_> = gc
                .iter()
                .filter_map(to_multi_line_string)
                .flat_map(|mls| mls.0)
                .collect();
            (!lines.is_empty()).then(|| MultiLineString::new(lines))
        }
        _ => None,
    }
}

pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::MultiPolygon(mp) => mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.0.iter().all(|ls| ls.0.is_empty()),
        Geometry::LineString(ls) => ls.0.is_empty(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::GeometryCollection(gc) => gc.iter().all(is_empty),
        _ => false,
    }
}

/// Minimum and maximum latitude of a shape's bounds.
pub fn latitude_extent(shape: &MultiPolygon<f64>) -> Option<(f64, f64)> {
    shape.bounding_rect().map(|r| (r.min().y, r.max().y))
}
