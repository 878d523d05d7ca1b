//! Features: one geometry plus an open property map.
//!
//! Features are immutable once loaded. Layers hand them out as `Arc<[Feature]>`
//! and every engine operation builds fresh output values instead of touching
//! its inputs.

use std::sync::Arc;

use geo::Geometry;
use serde_json::{Map, Value};

use crate::error::{GeoError, Result};

/// Property keys tried (in order) when a feature's display name is needed.
pub const NAME_FIELDS: &[&str] = &["name", "NAME", "name_en", "NAME_EN", "nameascii", "NAMEASCII"];

/// A loaded layer: immutable and cheap to clone.
pub type Layer = Arc<[Feature]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// First non-empty string among [`NAME_FIELDS`].
    pub fn name(&self) -> Option<&str> {
        self.string_property(NAME_FIELDS)
    }

    /// First non-empty string value among `keys`.
    pub fn string_property(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.properties.get(*k))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn from_geojson(feature: geojson::Feature) -> Result<Self> {
        let geometry = match feature.geometry {
            Some(g) => Some(geometry_from_geojson(g)?),
            None => None,
        };
        Ok(Self {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        })
    }

    pub fn to_geojson(&self) -> geojson::Feature {
        geojson::Feature {
            bbox: None,
            geometry: self.geometry.as_ref().map(geometry_to_geojson),
            id: None,
            properties: Some(self.properties.clone()),
            foreign_members: None,
        }
    }
}

pub fn geometry_from_geojson(geometry: geojson::Geometry) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from(geometry)
        .map_err(|e| GeoError::geometry(format!("unsupported GeoJSON geometry: {e}")))
}

pub fn geometry_to_geojson(geometry: &Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// Parse a GeoJSON document (FeatureCollection, Feature or bare Geometry)
/// into features.
pub fn features_from_geojson_str(text: &str) -> Result<Vec<Feature>> {
    let doc: geojson::GeoJson = text
        .parse()
        .map_err(|e| GeoError::geometry(format!("invalid GeoJSON: {e}")))?;
    features_from_geojson(doc)
}

pub fn features_from_geojson(doc: geojson::GeoJson) -> Result<Vec<Feature>> {
    match doc {
        geojson::GeoJson::FeatureCollection(fc) => {
            fc.features.into_iter().map(Feature::from_geojson).collect()
        }
        geojson::GeoJson::Feature(f) => Ok(vec![Feature::from_geojson(f)?]),
        geojson::GeoJson::Geometry(g) => Ok(vec![Feature {
            geometry: Some(geometry_from_geojson(g)?),
            properties: Map::new(),
        }]),
    }
}

/// Interpret a JSON value as a target feature.
///
/// Accepts a GeoJSON `Feature`, a bare GeoJSON geometry object, or a
/// single-feature `FeatureCollection`.
pub fn feature_from_json_value(value: &Value) -> Result<Feature> {
    let doc = geojson::GeoJson::from_json_value(value.clone())
        .map_err(|e| GeoError::invalid(format!("targetGeometry is not GeoJSON: {e}")))?;
    let mut features = features_from_geojson(doc)
        .map_err(|e| GeoError::invalid(format!("targetGeometry: {e}")))?;
    match features.len() {
        1 => {
            let feature = features.remove(0);
            if feature.geometry.is_none() {
                return Err(GeoError::invalid("targetGeometry has no geometry"));
            }
            Ok(feature)
        }
        n => Err(GeoError::invalid(format!(
            "targetGeometry must contain exactly one feature (got {n})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;
    use serde_json::json;

    #[test]
    fn name_prefers_first_non_empty_field() {
        let f = Feature::new(point!(x: 0.0, y: 0.0).into())
            .with_property("name", "  ")
            .with_property("NAME", "Texas");
        assert_eq!(f.name(), Some("Texas"));
    }

    #[test]
    fn parses_feature_collection() {
        let text = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": { "name": "A" },
                  "geometry": { "type": "Point", "coordinates": [1.0, 2.0] } },
                { "type": "Feature", "properties": { "name": "B" }, "geometry": null }
            ]
        })
        .to_string();
        let features = features_from_geojson_str(&text).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].name(), Some("A"));
        assert!(features[1].geometry.is_none());
    }

    #[test]
    fn target_value_accepts_bare_geometry() {
        let v = json!({ "type": "Point", "coordinates": [-122.4, 37.8] });
        let f = feature_from_json_value(&v).unwrap();
        assert!(matches!(f.geometry, Some(Geometry::Point(_))));
    }

    #[test]
    fn target_value_rejects_non_geojson() {
        let err = feature_from_json_value(&json!({ "lat": 1 })).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidOperation);
    }
}
