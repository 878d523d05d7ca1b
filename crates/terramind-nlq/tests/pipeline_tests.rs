//! End-to-end pipeline tests over an in-memory layer store.

use std::sync::Arc;
use std::time::Duration;

use geo::{point, polygon, Geometry, LineString};
use terramind_core::{
    ErrorKind, Feature, InterpretationSource, OperationKind, OperationRequest, ResultEnvelope,
};
use terramind_nlq::{
    FallbackInterpreter, MockOracle, OracleError, OracleResponse, QueryPipeline,
};
use terramind_store::MemoryLayerStore;

fn square(name: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
    let poly = polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
        (x: x0, y: y0),
    ];
    Feature::new(poly.into()).with_property("name", name)
}

fn city(name: &str, country: &str, lon: f64, lat: f64) -> Feature {
    Feature::new(point!(x: lon, y: lat).into())
        .with_property("NAME", name)
        .with_property("ADM0NAME", country)
}

fn store() -> MemoryLayerStore {
    let usa = "United States of America";
    MemoryLayerStore::new()
        .with_layer(
            "states",
            vec![
                square("Texas", 0.0, 0.0, 2.0, 2.0),
                square("Oklahoma", 0.0, 2.0, 2.0, 4.0),
                square("Louisiana", 2.0, 0.0, 3.0, 1.0),
                square("Nevada", 5.0, 5.0, 6.0, 6.0),
            ],
        )
        .with_layer(
            "cities",
            vec![
                city("San Francisco", "Argentina", -62.08, -31.43),
                city("San Francisco", usa, -122.42, 37.77),
                city("Oakland", usa, -122.27, 37.80),
                city("San Jose", usa, -121.89, 37.34),
                city("Los Angeles", usa, -118.24, 34.05),
            ],
        )
        .with_layer(
            "coastline",
            vec![Feature::new(Geometry::LineString(LineString::from(vec![
                (-124.0, 40.0),
                (-123.0, 38.0),
                (-121.0, 36.0),
            ])))
            .with_property("name", "Pacific coast")],
        )
}

fn pipeline() -> QueryPipeline {
    QueryPipeline::new(Arc::new(store())).unwrap()
}

fn with_oracle(replies: Vec<Result<OracleResponse, OracleError>>) -> QueryPipeline {
    pipeline().with_fallback(FallbackInterpreter::new(
        Arc::new(MockOracle::canned(replies)),
        Duration::from_secs(5),
    ))
}

fn names(envelope: &ResultEnvelope, key: &str) -> Vec<String> {
    envelope
        .results
        .iter()
        .map(|r| r.properties[key].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn border_question_runs_touches_against_resolved_state() {
    let envelope = pipeline()
        .run_query("Which states border Texas?", None)
        .await
        .unwrap();

    assert_eq!(envelope.operation_kind, OperationKind::Touches);
    assert_eq!(names(&envelope, "name"), ["Oklahoma", "Louisiana"]);
    assert!(envelope
        .results
        .iter()
        .all(|r| r.properties["target_name"] == "Texas"));
    assert_eq!(
        envelope.source,
        InterpretationSource::Template {
            pattern_id: "state_borders".to_string()
        }
    );
}

#[tokio::test]
async fn proximity_question_prefers_the_us_city() {
    let envelope = pipeline()
        .run_query("cities within 50 miles of San Francisco", None)
        .await
        .unwrap();

    assert_eq!(names(&envelope, "NAME"), ["San Francisco", "Oakland", "San Jose"]);
    for r in &envelope.results {
        assert_eq!(r.properties["ADM0NAME"], "United States of America");
        assert!(r.property_f64("distance_to_target").unwrap() <= 50.0);
        assert_eq!(r.properties["within_distance"], 50.0);
    }
}

#[tokio::test]
async fn coastline_buffer_question() {
    let envelope = pipeline()
        .run_query("buffer the coastline by 5 miles", None)
        .await
        .unwrap();

    assert_eq!(envelope.results.len(), 1);
    let r = &envelope.results[0];
    assert_eq!(r.properties["buffer_distance"], 5.0);
    assert_eq!(r.properties["buffer_units"], "miles");
    assert!(matches!(
        r.geometry,
        Some(Geometry::Polygon(_)) | Some(Geometry::MultiPolygon(_))
    ));

    let json = envelope.to_json();
    assert_eq!(json["type"], "FeatureCollection");
    assert_eq!(json["operationKind"], "BUFFER");
    assert_eq!(json["source"]["kind"], "template");
    assert_eq!(json["source"]["patternId"], "coastal_buffer");
    assert!(json["bbox"].is_array());
    assert!(!json["requestId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn missing_distance_is_reported_not_executed() {
    let err = pipeline()
        .run_query("show the coastline out to some miles", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(err.to_string().contains("could not extract distance"));
}

#[tokio::test]
async fn unmatched_query_without_oracle_is_uninterpretable() {
    let err = pipeline()
        .run_query("what's close to the bay", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);

    let err = pipeline().run_query("   ", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
}

#[tokio::test]
async fn oracle_answers_unmatched_queries() {
    let reply = OracleResponse {
        operation: OperationRequest {
            kind: "NEAR".to_string(),
            parameters: Default::default(),
            layers: vec!["cities".to_string()],
        }
        .with_parameter("target", "San Francisco")
        .with_parameter("distance", 10)
        .with_parameter("units", "miles"),
        explanation: Some("cities near San Francisco".to_string()),
        confidence: Some(0.82),
    };
    let envelope = with_oracle(vec![Ok(reply)])
        .run_query("what's close to the bay", None)
        .await
        .unwrap();

    assert_eq!(envelope.operation_kind, OperationKind::Within);
    assert_eq!(names(&envelope, "NAME"), ["San Francisco", "Oakland"]);
    assert_eq!(envelope.confidence, Some(0.82));
    assert_eq!(
        envelope.source,
        InterpretationSource::Oracle {
            backend: "mock".to_string()
        }
    );
}

#[tokio::test]
async fn oracle_output_is_validated_like_any_request() {
    let reply = OracleResponse {
        operation: OperationRequest::new(OperationKind::Buffer, &["glaciers"])
            .with_parameter("distance", 3),
        explanation: None,
        confidence: None,
    };
    let err = with_oracle(vec![Ok(reply)])
        .run_query("something about ice", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[tokio::test]
async fn oracle_failure_is_uninterpretable() {
    let err = with_oracle(vec![Err(OracleError::Transport("connection refused".into()))])
        .run_query("something about ice", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
}

#[tokio::test]
async fn direct_operation_with_unknown_place() {
    let request = OperationRequest::new(OperationKind::Touches, &["states"])
        .with_parameter("target", "Atlantis");
    let err = pipeline().run_operation(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityNotFound);
    assert!(err.to_string().contains("states, cities"));
}

#[tokio::test]
async fn direct_operation_resolves_targets_through_gazetteer_layers() {
    // The coastline layer has no "Oklahoma"; the states gazetteer does.
    let request = OperationRequest::new(OperationKind::Intersects, &["coastline"])
        .with_parameter("target", "Oklahoma");
    let envelope = pipeline().run_operation(request).await.unwrap();
    assert!(envelope.results.is_empty());
    assert_eq!(envelope.source, InterpretationSource::Direct);
}

#[tokio::test]
async fn direct_operation_with_inline_geometry() {
    let request = OperationRequest::new(OperationKind::Intersects, &["states"]).with_parameter(
        "targetGeometry",
        serde_json::json!({
            "type": "Point",
            "coordinates": [1.0, 3.0]
        }),
    );
    let envelope = pipeline().run_operation(request).await.unwrap();
    assert_eq!(names(&envelope, "name"), ["Oklahoma"]);
}

#[tokio::test]
async fn caller_supplied_layer_list_limits_validation() {
    let err = pipeline()
        .run_query("Which states border Texas?", Some(vec!["cities".to_string()]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}
