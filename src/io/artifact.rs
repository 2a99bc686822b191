//! Compressed columnar artifact format.
//!
//! An artifact is a gzip stream holding one header line followed by the
//! body. The header records the coordinate reference, row count, overall
//! bounding box and an xxh64 checksum of the body bytes. The body stores
//! typed attribute columns, a bounding box per row and GeoJSON-style
//! position arrays. Positions may carry a third ordinate; it is dropped on
//! read, so every layer that passes through here is two-dimensional.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use geo::BoundingRect;
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Rect,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::error::{PipelineError, Result};
use crate::models::{Feature, FeatureLayer, Value};

pub const ARTIFACT_EXT: &str = "json.gz";
const FORMAT: &str = "boundary-layer";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format: String,
    version: u32,
    crs: u32,
    rows: usize,
    bbox: Option<[f64; 4]>,
    checksum: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Column {
    name: String,
    values: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Body {
    columns: Vec<Column>,
    bboxes: Vec<Option<[f64; 4]>>,
    geometry: Vec<EncodedGeometry>,
}

type Position = Vec<f64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum EncodedGeometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
    MultiPoint(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    GeometryCollection(Vec<EncodedGeometry>),
}

fn rect_to_array(rect: Rect<f64>) -> [f64; 4] {
    [rect.min().x, rect.min().y, rect.max().x, rect.max().y]
}

fn encode_ring(ls: &LineString<f64>) -> Vec<Position> {
    ls.coords().map(|c| vec![c.x, c.y]).collect()
}

fn encode_polygon(p: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(p.exterior())
        .chain(p.interiors())
        .map(encode_ring)
        .collect()
}

fn encode(geometry: &Geometry<f64>) -> EncodedGeometry {
    match geometry {
        Geometry::Point(p) => EncodedGeometry::Point(vec![p.x(), p.y()]),
        Geometry::Line(l) => {
            EncodedGeometry::LineString(vec![vec![l.start.x, l.start.y], vec![l.end.x, l.end.y]])
        }
        Geometry::LineString(ls) => EncodedGeometry::LineString(encode_ring(ls)),
        Geometry::Polygon(p) => EncodedGeometry::Polygon(encode_polygon(p)),
        Geometry::MultiPoint(mp) => {
            EncodedGeometry::MultiPoint(mp.iter().map(|p| vec![p.x(), p.y()]).collect())
        }
        Geometry::MultiLineString(mls) => {
            EncodedGeometry::MultiLineString(mls.iter().map(encode_ring).collect())
        }
        Geometry::MultiPolygon(mp) => {
            EncodedGeometry::MultiPolygon(mp.iter().map(encode_polygon).collect())
        }
        Geometry::GeometryCollection(gc) => {
            EncodedGeometry::GeometryCollection(gc.iter().map(encode).collect())
        }
        Geometry::Rect(r) => EncodedGeometry::Polygon(encode_polygon(&r.to_polygon())),
        Geometry::Triangle(t) => EncodedGeometry::Polygon(encode_polygon(&t.to_polygon())),
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::CorruptArtifact {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Keep the first two ordinates of a position.
fn decode_position(path: &Path, p: &[f64]) -> Result<Coord<f64>> {
    match p {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(corrupt(path, "position with fewer than two ordinates")),
    }
}

fn decode_ring(path: &Path, ring: &[Position]) -> Result<LineString<f64>> {
    ring.iter()
        .map(|p| decode_position(path, p))
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn decode_polygon(path: &Path, rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|r| decode_ring(path, r));
    let exterior = match rings.next() {
        Some(ring) => ring?,
        None => LineString::new(vec![]),
    };
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn decode(path: &Path, encoded: &EncodedGeometry) -> Result<Geometry<f64>> {
    Ok(match encoded {
        EncodedGeometry::Point(p) => Geometry::Point(Point::from(decode_position(path, p)?)),
        EncodedGeometry::LineString(ls) => Geometry::LineString(decode_ring(path, ls)?),
        EncodedGeometry::Polygon(p) => Geometry::Polygon(decode_polygon(path, p)?),
        EncodedGeometry::MultiPoint(points) => Geometry::MultiPoint(MultiPoint::new(
            points
                .iter()
                .map(|p| decode_position(path, p).map(Point::from))
                .collect::<Result<Vec<_>>>()?,
        )),
        EncodedGeometry::MultiLineString(lines) => Geometry::MultiLineString(
            MultiLineString::new(
                lines
                    .iter()
                    .map(|l| decode_ring(path, l))
                    .collect::<Result<Vec<_>>>()?,
            ),
        ),
        EncodedGeometry::MultiPolygon(polygons) => Geometry::MultiPolygon(MultiPolygon::new(
            polygons
                .iter()
                .map(|p| decode_polygon(path, p))
                .collect::<Result<Vec<_>>>()?,
        )),
        EncodedGeometry::GeometryCollection(parts) => Geometry::GeometryCollection(
            GeometryCollection(
                parts
                    .iter()
                    .map(|g| decode(path, g))
                    .collect::<Result<Vec<_>>>()?,
            ),
        ),
    })
}

/// Persist a layer. The file appears atomically once fully written.
pub fn write_layer(path: &Path, layer: &FeatureLayer) -> Result<()> {
    let columns = layer
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| Column {
            name: name.clone(),
            values: layer
                .features()
                .iter()
                .map(|f| f.properties[i].clone())
                .collect(),
        })
        .collect();
    let body = Body {
        columns,
        bboxes: layer
            .features()
            .iter()
            .map(|f| f.geometry.bounding_rect().map(rect_to_array))
            .collect(),
        geometry: layer.features().iter().map(|f| encode(&f.geometry)).collect(),
    };

    let body_bytes = serde_json::to_vec(&body).map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let header = Header {
        format: FORMAT.to_string(),
        version: VERSION,
        crs: layer.crs(),
        rows: layer.len(),
        bbox: layer.bbox().map(rect_to_array),
        checksum: xxh64(&body_bytes, 0),
    };
    let header_bytes = serde_json::to_vec(&header).map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;

    let tmp = NamedTempFile::new_in(parent).map_err(|e| PipelineError::io(parent, e))?;
    let mut encoder = GzEncoder::new(tmp, Compression::default());
    for chunk in [header_bytes.as_slice(), &b"\n"[..], body_bytes.as_slice()] {
        encoder
            .write_all(chunk)
            .map_err(|e| PipelineError::io(path, e))?;
    }
    let tmp = encoder.finish().map_err(|e| PipelineError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::io(path, e.error))?;

    debug!("Wrote {} rows to {}", layer.len(), path.display());
    Ok(())
}

/// Load a layer written by [`write_layer`] or by an external converter.
pub fn read_layer(path: &Path) -> Result<FeatureLayer> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::io(path, e))?;

    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt(path, "missing header line"))?;
    let (header_bytes, rest) = bytes.split_at(split);
    let body_bytes = &rest[1..];

    let header: Header =
        serde_json::from_slice(header_bytes).map_err(|source| PipelineError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    if header.format != FORMAT || header.version != VERSION {
        return Err(corrupt(
            path,
            format!("unknown format {} v{}", header.format, header.version),
        ));
    }
    if xxh64(body_bytes, 0) != header.checksum {
        return Err(corrupt(path, "checksum mismatch"));
    }

    let body: Body = serde_json::from_slice(body_bytes).map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if body.geometry.len() != header.rows
        || body.columns.iter().any(|c| c.values.len() != header.rows)
    {
        return Err(corrupt(path, "column lengths disagree with row count"));
    }

    let names: Vec<String> = body.columns.iter().map(|c| c.name.clone()).collect();
    let mut columns: Vec<std::vec::IntoIter<Value>> = body
        .columns
        .into_iter()
        .map(|c| c.values.into_iter())
        .collect();

    let mut layer = FeatureLayer::new(names, header.crs);
    for encoded in &body.geometry {
        let properties = columns
            .iter_mut()
            .map(|c| c.next().unwrap_or_default())
            .collect();
        layer.push(Feature::new(properties, decode(path, encoded)?));
    }
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WGS84;
    use chrono::NaiveDate;
    use geo::polygon;

    fn sample() -> FeatureLayer {
        FeatureLayer::with_features(
            vec!["ADM0_PCODE".to_string(), "validOn".to_string(), "n".to_string()],
            WGS84,
            vec![Feature::new(
                vec![
                    Value::from("FR"),
                    Value::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()),
                    Value::Null,
                ],
                Geometry::Polygon(polygon![
                    (x: 0.0, y: 0.0),
                    (x: 1.0, y: 0.0),
                    (x: 1.0, y: 1.0),
                    (x: 0.0, y: 0.0),
                ]),
            )],
        )
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fra_adm0.json.gz");
        write_layer(&path, &sample()).unwrap();

        let layer = read_layer(&path).unwrap();
        assert_eq!(layer.columns(), sample().columns());
        assert_eq!(layer.features()[0].properties, sample().features()[0].properties);
        assert_eq!(layer.features()[0].geometry, sample().features()[0].geometry);
    }

    #[test]
    fn test_third_ordinate_dropped() {
        let encoded = EncodedGeometry::LineString(vec![vec![1.0, 2.0, 30.0], vec![3.0, 4.0, 50.0]]);
        let geometry = decode(Path::new("mem"), &encoded).unwrap();
        let Geometry::LineString(ls) = geometry else {
            panic!("expected a line string");
        };
        assert_eq!(ls.0, vec![Coord { x: 1.0, y: 2.0 }, Coord { x: 3.0, y: 4.0 }]);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json.gz");
        let header = Header {
            format: FORMAT.to_string(),
            version: VERSION,
            crs: WGS84,
            rows: 0,
            bbox: None,
            checksum: 1,
        };
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(&serde_json::to_vec(&header).unwrap()).unwrap();
        encoder
            .write_all(b"\n{\"columns\":[],\"bboxes\":[],\"geometry\":[]}")
            .unwrap();
        encoder.finish().unwrap();

        assert!(matches!(
            read_layer(&path),
            Err(PipelineError::CorruptArtifact { .. })
        ));
    }
}
