//! Geodesic distance between geometries.

use geo::{Closest, ClosestPoint, Coord, CoordsIter, Geometry, Intersects, Point};
use terramind_core::{GeoError, Result};

use crate::projection::{haversine_m, validate, LocalFrame};

/// Shortest great-circle distance in meters; 0 iff the geometries intersect.
///
/// The closest pair is located in a shared local frame (vertex of one
/// geometry against the whole of the other, both ways) and then measured
/// with the haversine formula.
pub fn geodesic_distance_m(a: &Geometry<f64>, b: &Geometry<f64>) -> Result<f64> {
    validate(a)?;
    validate(b)?;
    if a.intersects(b) {
        return Ok(0.0);
    }

    let frame = LocalFrame::spanning(&[a, b])?;
    let la = frame.project(a);
    let lb = frame.project(b);

    let best = closest_pair(&la, &lb)
        .into_iter()
        .chain(closest_pair(&lb, &la))
        .min_by(|x, y| x.2.total_cmp(&y.2))
        .ok_or_else(|| GeoError::geometry("no closest point between geometries"))?;

    let meters = haversine_m(frame.inverse(best.0), frame.inverse(best.1));
    // Disjoint geometries are never reported as touching.
    Ok(meters.max(f64::EPSILON))
}

/// Closest (vertex of `from`, point on `to`) pair with its planar distance.
fn closest_pair(from: &Geometry<f64>, to: &Geometry<f64>) -> Option<(Coord<f64>, Coord<f64>, f64)> {
    from.coords_iter()
        .filter_map(|c| {
            let p = Point::from(c);
            match to.closest_point(&p) {
                Closest::Intersection(q) | Closest::SinglePoint(q) => {
                    Some((c, q.0, (c.x - q.x()).hypot(c.y - q.y())))
                }
                Closest::Indeterminate => None,
            }
        })
        .min_by(|x, y| x.2.total_cmp(&y.2))
}
