//! Equal-area measurement.

use geo::{Area, BoundingRect, Geometry, MapCoords};
use terramind_core::{GeoError, Result};

use crate::projection::{validate, EARTH_RADIUS_M};

/// Area in square meters on a sinusoidal projection centered on the
/// geometry's own meridian. Non-areal geometries measure 0.
pub fn geodesic_area_m2(geometry: &Geometry<f64>) -> Result<f64> {
    validate(geometry)?;
    let rect = geometry
        .bounding_rect()
        .ok_or_else(|| GeoError::geometry("geometry has no extent"))?;
    let lon0 = rect.center().x;

    let projected = geometry.map_coords(move |c| {
        let lat = c.y.to_radians();
        geo::Coord {
            x: EARTH_RADIUS_M * (c.x - lon0).to_radians() * lat.cos(),
            y: EARTH_RADIUS_M * lat,
        }
    });
    let area = projected.unsigned_area();
    if !area.is_finite() {
        return Err(GeoError::geometry("area is not finite"));
    }
    Ok(area)
}
