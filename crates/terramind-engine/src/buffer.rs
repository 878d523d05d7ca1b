//! Metric buffers as Minkowski sums with a polygonal disk.
//!
//! Every point contributes a disk, every segment a capsule (the convex hull
//! of its two end disks) and every polygon its own interior. The union of
//! those pieces is the buffer. Disk vertices lie on the true circle, so the
//! approximation is inscribed and never exceeds the requested distance, while
//! the source geometry stays strictly inside for any positive distance.
//!
//! Each disk is built in a local frame centered on its own vertex, so its
//! east-west extent uses the scale at that vertex's latitude. Pieces are
//! assembled and merged in lon/lat degrees. Between two vertices a capsule
//! interpolates the degree widths linearly, which never undercuts the true
//! width since `1 / cos(lat)` is convex.

use std::f64::consts::TAU;

use geo::{BooleanOps, ConvexHull, Coord, Geometry, Line, LineString, MultiPoint, MultiPolygon, Polygon};
use rayon::prelude::*;
use terramind_core::{GeoError, Result};

use crate::projection::{validate, LocalFrame};

/// Default number of vertices in a disk.
pub const CIRCLE_SEGMENTS: usize = 32;

/// Buffer `geometry` (lon/lat degrees) by `meters`.
pub fn buffer(geometry: &Geometry<f64>, meters: f64, segments: usize) -> Result<MultiPolygon<f64>> {
    if !meters.is_finite() || meters <= 0.0 {
        return Err(GeoError::invalid(format!(
            "buffer distance must be positive and finite (got {meters} m)"
        )));
    }
    validate(geometry)?;

    let mut pieces = Vec::new();
    collect_pieces(geometry, meters, segments.max(8), &mut pieces);
    if pieces.is_empty() {
        return Err(GeoError::geometry("geometry produced no buffer pieces"));
    }

    let merged = pieces
        .into_par_iter()
        .map(|p| MultiPolygon::new(vec![p]))
        .reduce(|| MultiPolygon::new(Vec::new()), |a, b| union(&a, &b));

    if merged.0.is_empty() {
        return Err(GeoError::geometry("buffer union is empty"));
    }
    Ok(merged)
}

fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    match (a.0.is_empty(), b.0.is_empty()) {
        (true, _) => b.clone(),
        (_, true) => a.clone(),
        _ => a.union(b),
    }
}

fn collect_pieces(g: &Geometry<f64>, r: f64, segments: usize, out: &mut Vec<Polygon<f64>>) {
    match g {
        Geometry::Point(p) => out.push(disk(p.0, r, segments)),
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| disk(p.0, r, segments))),
        Geometry::Line(l) => out.push(capsule(*l, r, segments)),
        Geometry::LineString(ls) => linestring_pieces(ls, r, segments, out),
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                linestring_pieces(ls, r, segments, out);
            }
        }
        Geometry::Polygon(p) => polygon_pieces(p, r, segments, out),
        Geometry::MultiPolygon(mp) => {
            for p in mp {
                polygon_pieces(p, r, segments, out);
            }
        }
        Geometry::Rect(rect) => polygon_pieces(&rect.to_polygon(), r, segments, out),
        Geometry::Triangle(t) => polygon_pieces(&t.to_polygon(), r, segments, out),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_pieces(g, r, segments, out);
            }
        }
    }
}

fn linestring_pieces(ls: &LineString<f64>, r: f64, segments: usize, out: &mut Vec<Polygon<f64>>) {
    match ls.0.as_slice() {
        [] => {}
        [only] => out.push(disk(*only, r, segments)),
        _ => out.extend(ls.lines().map(|l| capsule(l, r, segments))),
    }
}

fn polygon_pieces(p: &Polygon<f64>, r: f64, segments: usize, out: &mut Vec<Polygon<f64>>) {
    // Degenerate rings still get their boundary capsules.
    if p.exterior().0.len() >= 4 {
        out.push(p.clone());
    }
    linestring_pieces(p.exterior(), r, segments, out);
    for hole in p.interiors() {
        linestring_pieces(hole, r, segments, out);
    }
}

/// Vertices (lon/lat) of a disk of radius `r` meters around `center`.
fn disk_vertices(center: Coord<f64>, r: f64, segments: usize) -> impl Iterator<Item = Coord<f64>> {
    let frame = LocalFrame::around(center.x, center.y);
    (0..segments).map(move |i| {
        let theta = TAU * i as f64 / segments as f64;
        frame.inverse(Coord {
            x: r * theta.cos(),
            y: r * theta.sin(),
        })
    })
}

fn disk(center: Coord<f64>, r: f64, segments: usize) -> Polygon<f64> {
    let mut ring: Vec<Coord<f64>> = disk_vertices(center, r, segments).collect();
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), Vec::new())
}

fn capsule(line: Line<f64>, r: f64, segments: usize) -> Polygon<f64> {
    if line.start == line.end {
        return disk(line.start, r, segments);
    }
    let points: MultiPoint<f64> = disk_vertices(line.start, r, segments)
        .chain(disk_vertices(line.end, r, segments))
        .map(geo::Point::from)
        .collect();
    points.convex_hull()
}
