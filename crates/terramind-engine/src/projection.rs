//! Local metric frames and great-circle distance.
//!
//! Input coordinates are longitude/latitude degrees. Distance searches
//! happen in a local equirectangular frame measured in meters, centered on
//! the data being processed; buffer disks use one frame per vertex. The mapping is affine in
//! (lon, lat), so straight edges stay straight in both directions and
//! containment computed in the frame carries over to degrees unchanged.

use geo::{BoundingRect, Coord, CoordsIter, Geometry, MapCoords, Rect};
use terramind_core::{GeoError, Result};

/// Mean earth radius (IUGG), meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Smallest cosine used for the east-west scale; keeps polar frames finite.
const MIN_COS_LAT: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    lon0: f64,
    lat0: f64,
    meters_per_degree_x: f64,
    meters_per_degree_y: f64,
}

impl LocalFrame {
    pub fn around(lon0: f64, lat0: f64) -> Self {
        let meters_per_degree_y = EARTH_RADIUS_M.to_radians();
        let cos = lat0.to_radians().cos().abs().max(MIN_COS_LAT);
        Self {
            lon0,
            lat0,
            meters_per_degree_x: meters_per_degree_y * cos,
            meters_per_degree_y,
        }
    }

    /// Frame centered on the joint bounding box of `geometries`.
    pub fn spanning(geometries: &[&Geometry<f64>]) -> Result<Self> {
        let rect = geometries
            .iter()
            .map(|g| bounds(g))
            .try_fold(None::<Rect<f64>>, |acc, r| {
                let r = r?;
                Ok::<_, GeoError>(Some(match acc {
                    None => r,
                    Some(a) => Rect::new(
                        Coord {
                            x: a.min().x.min(r.min().x),
                            y: a.min().y.min(r.min().y),
                        },
                        Coord {
                            x: a.max().x.max(r.max().x),
                            y: a.max().y.max(r.max().y),
                        },
                    ),
                }))
            })?
            .ok_or_else(|| GeoError::geometry("no geometry to build a frame from"))?;
        let center = rect.center();
        Ok(Self::around(center.x, center.y))
    }

    pub fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.lon0) * self.meters_per_degree_x,
            y: (c.y - self.lat0) * self.meters_per_degree_y,
        }
    }

    pub fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.lon0 + c.x / self.meters_per_degree_x,
            y: self.lat0 + c.y / self.meters_per_degree_y,
        }
    }

    pub fn project<G>(&self, geometry: &G) -> G::Output
    where
        G: MapCoords<f64, f64>,
    {
        let frame = *self;
        geometry.map_coords(move |c| frame.forward(c))
    }
}

/// Reject empty geometries and non-finite or out-of-range coordinates.
pub fn validate(geometry: &Geometry<f64>) -> Result<()> {
    let mut seen = false;
    for c in geometry.coords_iter() {
        seen = true;
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(GeoError::geometry(format!(
                "non-finite coordinate ({}, {})",
                c.x, c.y
            )));
        }
        if c.y.abs() > 90.0 {
            return Err(GeoError::geometry(format!("latitude {} out of range", c.y)));
        }
    }
    if !seen {
        return Err(GeoError::geometry("empty geometry"));
    }
    Ok(())
}

fn bounds(geometry: &Geometry<f64>) -> Result<Rect<f64>> {
    validate(geometry)?;
    geometry
        .bounding_rect()
        .ok_or_else(|| GeoError::geometry("geometry has no extent"))
}

/// Great-circle distance in meters between two lon/lat coordinates.
pub fn haversine_m(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.x - a.x).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
