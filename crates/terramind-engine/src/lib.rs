//! TerraMind spatial operation engine
//!
//! Executes a bound [`Operation<Feature>`](terramind_core::BoundOperation)
//! over the concatenated features of its layers and returns freshly built
//! [`OpResult`]s. The engine is synchronous and CPU-bound; async callers run
//! it on a blocking worker.
//!
//! ## Failure model
//!
//! - Per-feature operations (BUFFER, WITHIN, TOUCHES, INTERSECTS,
//!   AREA_FILTER) skip features whose geometry cannot be processed and log
//!   the skip at `debug` level.
//! - Folds (UNION, DIFFERENCE) fail the whole request on any bad input.

pub mod area;
pub mod buffer;
pub mod distance;
pub mod overlay;
pub mod predicates;
pub mod projection;

use geo::{Geometry, MultiPolygon};
use rayon::prelude::*;
use serde_json::{Map, Value};
use terramind_core::{
    AreaFilterParams, BoundOperation, BufferParams, Feature, GeoError, OpResult, OperationKind,
    OperationSpec, Result, WithinParams,
};

pub use area::geodesic_area_m2;
pub use buffer::{buffer, CIRCLE_SEGMENTS};
pub use distance::geodesic_distance_m;

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SpatialEngine {
    circle_segments: usize,
}

impl Default for SpatialEngine {
    fn default() -> Self {
        Self {
            circle_segments: CIRCLE_SEGMENTS,
        }
    }
}

impl SpatialEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertices per buffer disk (minimum 8).
    pub fn with_circle_segments(mut self, segments: usize) -> Self {
        self.circle_segments = segments.max(8);
        self
    }

    pub fn execute(&self, operation: &BoundOperation, features: &[Feature]) -> Result<Vec<OpResult>> {
        let kind = operation.kind();
        let results = match &operation.spec {
            OperationSpec::Buffer(params) => self.per_feature(kind, features, |f, g| {
                self.buffer_one(f, g, params)
            }),
            OperationSpec::Within(params) => {
                let target = target_geometry(&params.target)?;
                self.per_feature(kind, features, |f, g| within_one(f, g, target, params))
            }
            OperationSpec::Touches { target } => {
                let target_geom = target_geometry(target)?;
                self.per_feature(kind, features, |f, g| {
                    Ok(predicates::touches(g, target_geom).then(|| matched(kind, f, g, target)))
                })
            }
            OperationSpec::Intersects { target } => {
                let target_geom = target_geometry(target)?;
                self.per_feature(kind, features, |f, g| {
                    Ok(predicates::intersects(g, target_geom).then(|| matched(kind, f, g, target)))
                })
            }
            OperationSpec::AreaFilter(params) => {
                self.per_feature(kind, features, |f, g| area_one(f, g, params))
            }
            OperationSpec::Union => vec![union_features(features)?],
            OperationSpec::Difference => vec![difference_features(features)?],
        };

        tracing::info!(
            kind = %kind,
            inputs = features.len(),
            results = results.len(),
            "engine finished"
        );
        Ok(results)
    }

    /// Run `f` on every feature with geometry in parallel, keeping input order.
    /// Errors skip the feature; `Ok(None)` filters it out.
    fn per_feature<F>(&self, kind: OperationKind, features: &[Feature], f: F) -> Vec<OpResult>
    where
        F: Fn(&Feature, &Geometry<f64>) -> Result<Option<OpResult>> + Sync,
    {
        features
            .par_iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let Some(geometry) = feature.geometry.as_ref() else {
                    tracing::debug!(kind = %kind, index, "skipping feature without geometry");
                    return None;
                };
                match f(feature, geometry) {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::debug!(
                            kind = %kind,
                            index,
                            name = feature.name().unwrap_or(""),
                            error = %err,
                            "skipping feature"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn buffer_one(
        &self,
        feature: &Feature,
        geometry: &Geometry<f64>,
        params: &BufferParams,
    ) -> Result<Option<OpResult>> {
        let meters = params.meters();
        let buffered = buffer::buffer(geometry, meters, self.circle_segments)?;
        let mut props = feature.properties.clone();
        props.insert("buffer_distance".into(), Value::from(params.distance));
        props.insert("buffer_units".into(), Value::from(params.units.as_str()));
        props.insert("buffer_meters".into(), Value::from(meters));
        Ok(Some(OpResult::new(
            OperationKind::Buffer,
            simplify_multipolygon(buffered),
            props,
        )))
    }
}

// ============================================================================
// Per-feature operations
// ============================================================================

fn target_geometry(target: &Feature) -> Result<&Geometry<f64>> {
    let geometry = target
        .geometry
        .as_ref()
        .ok_or_else(|| GeoError::invalid("target feature has no geometry"))?;
    projection::validate(geometry)?;
    Ok(geometry)
}

fn within_one(
    feature: &Feature,
    geometry: &Geometry<f64>,
    target: &Geometry<f64>,
    params: &WithinParams<Feature>,
) -> Result<Option<OpResult>> {
    let meters = distance::geodesic_distance_m(geometry, target)?;
    if meters > params.radius_meters() {
        return Ok(None);
    }
    let mut props = feature.properties.clone();
    props.insert(
        "distance_to_target".into(),
        Value::from(params.units.from_meters(meters)),
    );
    props.insert("distance_to_target_meters".into(), Value::from(meters));
    props.insert("within_distance".into(), Value::from(params.distance));
    props.insert("units".into(), Value::from(params.units.as_str()));
    Ok(Some(OpResult::new(OperationKind::Within, geometry.clone(), props)))
}

fn matched(kind: OperationKind, feature: &Feature, geometry: &Geometry<f64>, target: &Feature) -> OpResult {
    let mut props = feature.properties.clone();
    if let Some(name) = target.name() {
        props.insert("target_name".into(), Value::from(name));
    }
    OpResult::new(kind, geometry.clone(), props)
}

fn area_one(
    feature: &Feature,
    geometry: &Geometry<f64>,
    params: &AreaFilterParams,
) -> Result<Option<OpResult>> {
    let square_meters = area::geodesic_area_m2(geometry)?;
    let area = params.units.from_square_meters(square_meters);
    if area < params.min_area {
        return Ok(None);
    }
    let mut props = feature.properties.clone();
    props.insert("area".into(), Value::from(area));
    props.insert("area_units".into(), Value::from(params.units.as_str()));
    props.insert("area_square_meters".into(), Value::from(square_meters));
    Ok(Some(OpResult::new(OperationKind::AreaFilter, geometry.clone(), props)))
}

// ============================================================================
// Folds
// ============================================================================

fn geometries(features: &[Feature]) -> Vec<&Geometry<f64>> {
    features.iter().filter_map(|f| f.geometry.as_ref()).collect()
}

fn union_features(features: &[Feature]) -> Result<OpResult> {
    let inputs = geometries(features);
    let merged = overlay::union_all(&inputs)?;
    let mut props = Map::new();
    props.insert("feature_count".into(), Value::from(inputs.len()));
    Ok(OpResult::new(OperationKind::Union, simplify_multipolygon(merged), props))
}

fn difference_features(features: &[Feature]) -> Result<OpResult> {
    let inputs = geometries(features);
    let remaining = overlay::difference_all(&inputs)?;
    let mut props = features
        .iter()
        .find(|f| f.geometry.is_some())
        .map(|f| f.properties.clone())
        .unwrap_or_default();
    props.insert("feature_count".into(), Value::from(inputs.len()));
    props.insert("subtracted_count".into(), Value::from(inputs.len() - 1));
    Ok(OpResult::new(
        OperationKind::Difference,
        simplify_multipolygon(remaining),
        props,
    ))
}

/// A single-member MultiPolygon is emitted as a plain Polygon.
fn simplify_multipolygon(mut mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        if let Some(p) = mp.0.pop() {
            return Geometry::Polygon(p);
        }
    }
    Geometry::MultiPolygon(mp)
}
