//! Engine results and the FeatureCollection envelope handed back to callers.

use geo::{BoundingRect, Geometry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::feature::geometry_to_geojson;
use crate::operation::OperationKind;

/// Tag stamped on every result produced by the spatial engine.
pub const ENGINE_TAG: &str = "terramind-geo";

/// One engine output: a freshly built geometry plus derived properties.
#[derive(Debug, Clone, PartialEq)]
pub struct OpResult {
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
    pub operation_kind: OperationKind,
    pub engine_tag: &'static str,
}

impl OpResult {
    pub fn new(
        operation_kind: OperationKind,
        geometry: Geometry<f64>,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            geometry: Some(geometry),
            properties,
            operation_kind,
            engine_tag: ENGINE_TAG,
        }
    }

    pub fn property_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    pub fn to_geojson(&self) -> geojson::Feature {
        let mut properties = self.properties.clone();
        properties.insert(
            "operationKind".to_string(),
            Value::from(self.operation_kind.as_str()),
        );
        properties.insert("engineTag".to_string(), Value::from(self.engine_tag));
        geojson::Feature {
            bbox: None,
            geometry: self.geometry.as_ref().map(geometry_to_geojson),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// How the operation behind a response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterpretationSource {
    Template {
        #[serde(rename = "patternId")]
        pattern_id: String,
    },
    Oracle {
        backend: String,
    },
    /// A structured operation submitted directly; no interpretation step.
    Direct,
}

/// Everything a successful request returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub results: Vec<OpResult>,
    pub operation_kind: OperationKind,
    pub explanation: Option<String>,
    pub confidence: Option<f64>,
    pub source: InterpretationSource,
    pub request_id: String,
}

impl ResultEnvelope {
    /// `[min_lon, min_lat, max_lon, max_lat]` over every result geometry.
    pub fn bbox(&self) -> Option<[f64; 4]> {
        self.results
            .iter()
            .filter_map(|r| r.geometry.as_ref())
            .filter_map(|g| g.bounding_rect())
            .fold(None, |acc: Option<[f64; 4]>, rect| {
                let (lo, hi) = (rect.min(), rect.max());
                Some(match acc {
                    None => [lo.x, lo.y, hi.x, hi.y],
                    Some([a, b, c, d]) => [a.min(lo.x), b.min(lo.y), c.max(hi.x), d.max(hi.y)],
                })
            })
    }

    /// Render as a GeoJSON FeatureCollection with the request metadata as
    /// foreign members.
    pub fn to_json(&self) -> Value {
        let mut members = Map::new();
        members.insert(
            "operationKind".to_string(),
            Value::from(self.operation_kind.as_str()),
        );
        if let Some(explanation) = &self.explanation {
            members.insert("explanation".to_string(), Value::from(explanation.as_str()));
        }
        if let Some(confidence) = self.confidence {
            members.insert("confidence".to_string(), Value::from(confidence));
        }
        members.insert(
            "source".to_string(),
            serde_json::to_value(&self.source).unwrap_or(Value::Null),
        );
        members.insert("requestId".to_string(), Value::from(self.request_id.as_str()));

        let collection = geojson::FeatureCollection {
            bbox: self.bbox().map(|b| b.to_vec()),
            features: self.results.iter().map(OpResult::to_geojson).collect(),
            foreign_members: Some(members),
        };
        Value::Object(geojson::JsonObject::from(&collection))
    }
}
