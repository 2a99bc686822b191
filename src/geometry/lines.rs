//! Boundary curves and line differences.
//!
//! The difference is computed segment by segment: every segment of the
//! subject is split wherever a vertex of the other curve set lies on it, and
//! each resulting piece is dropped when it runs along the other curves.

use geo::{Coord, Line, LineString, MultiLineString, MultiPolygon};
use hashbrown::{HashMap, HashSet};
use rstar::{RTree, RTreeObject, AABB};

/// Segment of the subtracted curve set, indexed by its padded envelope
struct IndexedSegment {
    start: Coord<f64>,
    end: Coord<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedSegment {
    fn new(line: Line<f64>, tolerance: f64) -> Self {
        Self {
            start: line.start,
            end: line.end,
            envelope: padded_envelope(&line, tolerance),
        }
    }
}

fn padded_envelope(line: &Line<f64>, pad: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [
            line.start.x.min(line.end.x) - pad,
            line.start.y.min(line.end.y) - pad,
        ],
        [
            line.start.x.max(line.end.x) + pad,
            line.start.y.max(line.end.y) + pad,
        ],
    )
}

/// Rings of every polygon as curves.
pub fn boundary_of(shape: &MultiPolygon<f64>) -> MultiLineString<f64> {
    let rings = shape
        .iter()
        .flat_map(|polygon| {
            std::iter::once(polygon.exterior().clone()).chain(polygon.interiors().iter().cloned())
        })
        .filter(|ring| ring.0.len() >= 2)
        .collect();
    MultiLineString::new(rings)
}

fn point_at(line: &Line<f64>, t: f64) -> Coord<f64> {
    if t <= 0.0 {
        line.start
    } else if t >= 1.0 {
        line.end
    } else {
        Coord {
            x: line.start.x + (line.end.x - line.start.x) * t,
            y: line.start.y + (line.end.y - line.start.y) * t,
        }
    }
}

/// Parameter of `p`'s projection onto the segment when `p` lies on it.
fn parameter_on(line: &Line<f64>, p: Coord<f64>, tolerance: f64) -> Option<f64> {
    let dx = line.end.x - line.start.x;
    let dy = line.end.y - line.start.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return None;
    }
    let t = ((p.x - line.start.x) * dx + (p.y - line.start.y) * dy) / len2;
    let closest = point_at(line, t);
    let dist = ((p.x - closest.x).powi(2) + (p.y - closest.y).powi(2)).sqrt();
    (dist <= tolerance).then_some(t)
}

fn distance_to_segment(p: Coord<f64>, start: Coord<f64>, end: Coord<f64>) -> f64 {
    let line = Line::new(start, end);
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.x - start.x) * dx + (p.y - start.y) * dy) / len2).clamp(0.0, 1.0)
    };
    let c = point_at(&line, t);
    ((p.x - c.x).powi(2) + (p.y - c.y).powi(2)).sqrt()
}

fn flush(current: &mut Vec<Coord<f64>>, pieces: &mut Vec<LineString<f64>>) {
    if current.len() >= 2 {
        pieces.push(LineString::new(std::mem::take(current)));
    } else {
        current.clear();
    }
}

/// Parts of `subject` that do not run along `other`, within `tolerance`.
pub fn line_difference(
    subject: &MultiLineString<f64>,
    other: &MultiLineString<f64>,
    tolerance: f64,
) -> MultiLineString<f64> {
    let segments: Vec<IndexedSegment> = other
        .iter()
        .flat_map(|ls| ls.lines())
        .filter(|l| l.start != l.end)
        .map(|l| IndexedSegment::new(l, tolerance))
        .collect();
    let tree = RTree::bulk_load(segments);

    let mut pieces = Vec::new();
    for ls in subject.iter() {
        let mut current: Vec<Coord<f64>> = Vec::new();
        for line in ls.lines() {
            if line.start == line.end {
                continue;
            }
            let candidates: Vec<&IndexedSegment> = tree
                .locate_in_envelope_intersecting(&padded_envelope(&line, 0.0))
                .collect();

            let mut cuts = vec![0.0, 1.0];
            for seg in &candidates {
                for p in [seg.start, seg.end] {
                    if let Some(t) = parameter_on(&line, p, tolerance) {
                        if t > 0.0 && t < 1.0 {
                            cuts.push(t);
                        }
                    }
                }
            }
            cuts.sort_by(f64::total_cmp);
            cuts.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

            for w in cuts.windows(2) {
                let from = point_at(&line, w[0]);
                let to = point_at(&line, w[1]);
                let mid = point_at(&line, (w[0] + w[1]) / 2.0);
                let covered = candidates
                    .iter()
                    .any(|s| distance_to_segment(mid, s.start, s.end) <= tolerance);
                if covered {
                    flush(&mut current, &mut pieces);
                    continue;
                }
                if current.last() != Some(&from) {
                    flush(&mut current, &mut pieces);
                    current.push(from);
                }
                current.push(to);
            }
        }
        flush(&mut current, &mut pieces);
    }

    MultiLineString::new(pieces)
}

/// Hash key of a coordinate; `-0.0` and `0.0` share a key.
fn coord_key(c: Coord<f64>) -> [u64; 2] {
    [(c.x + 0.0).to_bits(), (c.y + 0.0).to_bits()]
}

fn segment_key(a: Coord<f64>, b: Coord<f64>) -> [u64; 4] {
    let (a, b) = if (a.x, a.y) <= (b.x, b.y) { (a, b) } else { (b, a) };
    let (a, b) = (coord_key(a), coord_key(b));
    [a[0], a[1], b[0], b[1]]
}

/// Merge curve sets into one, removing repeated segments in either
/// direction and joining what touches.
///
/// Runs of segments not seen before stay in one piece; a run is only cut
/// where it meets a segment that was already taken.
pub fn dissolve_lines(parts: &[MultiLineString<f64>]) -> MultiLineString<f64> {
    let mut seen: HashSet<[u64; 4]> = HashSet::new();
    let mut runs: Vec<LineString<f64>> = Vec::new();
    for ls in parts.iter().flat_map(|mls| mls.iter()) {
        let mut run: Vec<Coord<f64>> = Vec::new();
        for line in ls.lines() {
            if line.start == line.end {
                continue;
            }
            if !seen.insert(segment_key(line.start, line.end)) {
                flush(&mut run, &mut runs);
                continue;
            }
            if run.last() != Some(&line.start) {
                flush(&mut run, &mut runs);
                run.push(line.start);
            }
            run.push(line.end);
        }
        flush(&mut run, &mut runs);
    }
    join_line_strings(runs)
}

/// Next unused part touching `at`, dropping used entries on the way.
fn take_touching(
    index: &mut HashMap<[u64; 2], Vec<usize>>,
    used: &mut [bool],
    at: Coord<f64>,
) -> Option<usize> {
    let candidates = index.get_mut(&coord_key(at))?;
    while let Some(j) = candidates.pop() {
        if !used[j] {
            used[j] = true;
            return Some(j);
        }
    }
    None
}

/// Extend `current` from its last point with touching parts until it closes
/// or nothing touches.
fn extend_forward(
    current: &mut Vec<Coord<f64>>,
    parts: &[Vec<Coord<f64>>],
    index: &mut HashMap<[u64; 2], Vec<usize>>,
    used: &mut [bool],
) {
    while current.first() != current.last() {
        let Some(&end) = current.last() else {
            return;
        };
        let Some(j) = take_touching(index, used, end) else {
            return;
        };
        let part = &parts[j];
        if coord_key(part[0]) == coord_key(end) {
            current.extend(part.iter().skip(1));
        } else {
            current.extend(part.iter().rev().skip(1));
        }
    }
}

/// Join line strings that share end points into longer ones.
pub fn join_line_strings(parts: Vec<LineString<f64>>) -> MultiLineString<f64> {
    let parts: Vec<Vec<Coord<f64>>> = parts
        .into_iter()
        .map(|ls| ls.0)
        .filter(|c| c.len() >= 2)
        .collect();

    let mut index: HashMap<[u64; 2], Vec<usize>> = HashMap::with_capacity(parts.len() * 2);
    for (i, coords) in parts.iter().enumerate().rev() {
        for end in [coords[0], coords[coords.len() - 1]] {
            index.entry(coord_key(end)).or_default().push(i);
        }
    }

    let mut used = vec![false; parts.len()];
    let mut result = Vec::new();
    for i in 0..parts.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut current = parts[i].clone();
        extend_forward(&mut current, &parts, &mut index, &mut used);
        if current.first() != current.last() {
            current.reverse();
            extend_forward(&mut current, &parts, &mut index, &mut used);
            current.reverse();
        }
        result.push(LineString::new(current));
    }

    MultiLineString::new(result)
}
