//! Integration tests for the complete TerraMind pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - GeoJSON files → DirectoryLayerStore → QueryPipeline → SpatialEngine
//! - Question text → templates / oracle → result envelope
//! - Error kinds surfacing from every stage
//!
//! Run with: cargo test --test integration_tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use geo::Relate;
use serde_json::{json, Value};
use tempfile::tempdir;
use terramind_core::{
    features_from_geojson_str, ErrorKind, InterpretationSource, OperationKind, OperationRequest,
    ENGINE_TAG,
};
use terramind_nlq::{FallbackInterpreter, MockOracle, QueryPipeline};
use terramind_store::DirectoryLayerStore;

fn feature(name: &str, geometry: Value) -> Value {
    json!({ "type": "Feature", "properties": { "name": name }, "geometry": geometry })
}

fn square(name: &str, x0: f64, y0: f64, size: f64) -> Value {
    let (x1, y1) = (x0 + size, y0 + size);
    feature(
        name,
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        }),
    )
}

fn write_layer(dir: &Path, name: &str, features: Vec<Value>) {
    let doc = json!({ "type": "FeatureCollection", "features": features });
    std::fs::write(dir.join(format!("{name}.geojson")), doc.to_string()).unwrap();
}

/// Coastline, states and cities layers in a fresh directory.
fn data_dir() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    write_layer(
        dir.path(),
        "coastline",
        vec![
            feature(
                "Pacific",
                json!({ "type": "LineString", "coordinates": [[-124.2, 41.9], [-123.8, 39.4], [-122.5, 37.7]] }),
            ),
            feature(
                "Gulf",
                json!({ "type": "LineString", "coordinates": [[-97.4, 27.8], [-94.0, 29.6], [-89.6, 30.2]] }),
            ),
            json!({ "type": "Feature", "properties": { "name": "unmapped" }, "geometry": null }),
        ],
    );
    write_layer(
        dir.path(),
        "states",
        vec![
            square("Alpha", 0.0, 0.0, 2.0),
            square("Beta", 2.0, 0.0, 2.0),
            square("Gamma", 0.0, 2.0, 1.0),
            square("Delta", 10.0, 10.0, 1.0),
        ],
    );
    let city = |name: &str, country: &str, lon: f64, lat: f64| {
        json!({
            "type": "Feature",
            "properties": { "NAME": name, "ADM0NAME": country },
            "geometry": { "type": "Point", "coordinates": [lon, lat] }
        })
    };
    write_layer(
        dir.path(),
        "cities",
        vec![
            city("San Francisco", "Argentina", -62.08, -31.43),
            city("San Francisco", "United States of America", -122.42, 37.77),
            city("San Jose", "United States of America", -121.89, 37.34),
            city("Sacramento", "United States of America", -121.49, 38.58),
        ],
    );
    dir
}

fn pipeline(dir: &Path) -> QueryPipeline {
    QueryPipeline::new(Arc::new(DirectoryLayerStore::new(dir))).unwrap()
}

// ============================================================================
// Structured operations
// ============================================================================

#[tokio::test]
async fn test_buffer_coastline_end_to_end() {
    let dir = data_dir();
    let request: OperationRequest = serde_json::from_value(json!({
        "type": "BUFFER",
        "parameters": { "distance": 50, "units": "miles" },
        "layers": ["coastline"]
    }))
    .unwrap();

    let envelope = pipeline(dir.path()).run_operation(request).await.unwrap();

    // One result per feature with geometry; the null-geometry feature is skipped.
    assert_eq!(envelope.results.len(), 2);

    let text = std::fs::read_to_string(dir.path().join("coastline.geojson")).unwrap();
    let sources = features_from_geojson_str(&text).unwrap();
    for (result, source) in envelope.results.iter().zip(&sources) {
        assert_eq!(result.properties["buffer_distance"], 50.0);
        assert_eq!(result.properties["name"], source.properties["name"]);
        assert_eq!(result.engine_tag, ENGINE_TAG);
        let buffered = result.geometry.as_ref().unwrap();
        let original = source.geometry.as_ref().unwrap();
        assert!(buffered.relate(original).is_contains());
    }
}

#[tokio::test]
async fn test_area_filter_union_and_difference() {
    let dir = data_dir();
    let p = pipeline(dir.path());

    // A 2° square near the equator is ~19,000 sq mi; a 1° square ~4,800.
    let envelope = p
        .run_operation(
            OperationRequest::new(OperationKind::AreaFilter, &["states"])
                .with_parameter("minArea", 10_000)
                .with_parameter("units", "square_miles"),
        )
        .await
        .unwrap();
    let names: Vec<_> = envelope
        .results
        .iter()
        .map(|r| r.properties["name"].clone())
        .collect();
    assert_eq!(names, [json!("Alpha"), json!("Beta")]);

    let union = p
        .run_operation(OperationRequest::new(OperationKind::Union, &["states"]))
        .await
        .unwrap();
    assert_eq!(union.results.len(), 1);
    assert_eq!(union.results[0].properties["feature_count"], 4);

    let difference = p
        .run_operation(OperationRequest::new(OperationKind::Difference, &["states"]))
        .await
        .unwrap();
    assert_eq!(difference.results.len(), 1);
    assert_eq!(difference.results[0].properties["name"], "Alpha");
    assert_eq!(difference.results[0].properties["subtracted_count"], 3);
}

// ============================================================================
// Question text
// ============================================================================

#[tokio::test]
async fn test_question_to_envelope() {
    let dir = data_dir();
    let envelope = pipeline(dir.path())
        .run_query("Which cities are within 50 miles of San Francisco?", None)
        .await
        .unwrap();

    let names: Vec<_> = envelope
        .results
        .iter()
        .map(|r| r.properties["NAME"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["San Francisco", "San Jose"]);

    let json = envelope.to_json();
    assert_eq!(json["type"], "FeatureCollection");
    assert_eq!(json["operationKind"], "WITHIN");
    assert_eq!(json["source"]["kind"], "template");
    assert_eq!(json["source"]["patternId"], "cities_near");
    assert_eq!(json["features"][0]["properties"]["engineTag"], ENGINE_TAG);
    assert_eq!(json["bbox"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_oracle_fallback_with_heuristic_mock() {
    let dir = data_dir();
    let p = pipeline(dir.path()).with_fallback(FallbackInterpreter::new(
        Arc::new(MockOracle::heuristic().unwrap()),
        Duration::from_secs(5),
    ));

    // No template mentions "touch"; the mock guesses TOUCHES on states.
    let envelope = p
        .run_query("states touching the outline of Alpha", None)
        .await
        .unwrap();
    assert_eq!(envelope.operation_kind, OperationKind::Touches);
    assert!(matches!(envelope.source, InterpretationSource::Oracle { .. }));
    let names: Vec<_> = envelope
        .results
        .iter()
        .map(|r| r.properties["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["Beta", "Gamma"]);
}

// ============================================================================
// Concurrent Access Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_queries_share_one_store() {
    let dir = data_dir();
    let p = Arc::new(pipeline(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let p = p.clone();
            tokio::spawn(async move {
                p.run_query("Which states border Alpha?", None).await
            })
        })
        .collect();

    let mut request_ids = Vec::new();
    for handle in handles {
        let envelope = handle.await.unwrap().unwrap();
        assert_eq!(envelope.results.len(), 2);
        request_ids.push(envelope.request_id);
    }
    request_ids.sort();
    request_ids.dedup();
    assert_eq!(request_ids.len(), 8);
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_error_kinds_surface_from_each_stage() {
    let dir = data_dir();
    std::fs::write(dir.path().join("broken.geojson"), "{ \"type\": \"Nope\" }").unwrap();
    let p = pipeline(dir.path());

    let err = p
        .run_operation(OperationRequest::new(OperationKind::Union, &["broken"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LayerUnavailable);

    let err = p
        .run_operation(OperationRequest::new(OperationKind::Union, &["glaciers"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    let err = p
        .run_operation(OperationRequest::new(OperationKind::Union, &["coastline"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GeometryComputationError);

    let err = p
        .run_query("Which states border Atlantis?", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityNotFound);

    let err = p.run_query("what is the weather", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
}
