//! Sequential union / difference folds over areal geometries.

use geo::{BooleanOps, Geometry, MultiPolygon};
use terramind_core::{GeoError, Result};

use crate::projection::validate;

/// Areal view of a geometry; anything without area is rejected.
pub fn as_multipolygon(geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>> {
    validate(geometry)?;
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Ok(mp.clone()),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        other => Err(GeoError::geometry(format!(
            "overlay needs polygonal geometry, got {}",
            geometry_type(other)
        ))),
    }
}

pub fn union_all(geometries: &[&Geometry<f64>]) -> Result<MultiPolygon<f64>> {
    let (first, rest) = split(geometries, "UNION")?;
    rest.iter().try_fold(as_multipolygon(first)?, |acc, g| {
        Ok(acc.union(&as_multipolygon(g)?))
    })
}

/// `geometries[0]` minus every later geometry, in order.
pub fn difference_all(geometries: &[&Geometry<f64>]) -> Result<MultiPolygon<f64>> {
    let (first, rest) = split(geometries, "DIFFERENCE")?;
    rest.iter().try_fold(as_multipolygon(first)?, |acc, g| {
        Ok(acc.difference(&as_multipolygon(g)?))
    })
}

fn split<'a>(
    geometries: &'a [&'a Geometry<f64>],
    op: &str,
) -> Result<(&'a Geometry<f64>, &'a [&'a Geometry<f64>])> {
    match geometries {
        [first, rest @ ..] if !rest.is_empty() => Ok((*first, rest)),
        _ => Err(GeoError::invalid(format!(
            "{op} needs at least 2 input geometries (got {})",
            geometries.len()
        ))),
    }
}

pub(crate) fn geometry_type(g: &Geometry<f64>) -> &'static str {
    match g {
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
