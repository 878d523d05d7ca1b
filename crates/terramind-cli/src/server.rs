//! HTTP front end (`terramind serve`).
//!
//! Routes:
//! - `GET  /healthz`
//! - `GET  /layers`
//! - `POST /query`      `{ "query": "...", "layers": [...]? }`
//! - `POST /operation`  `{ "type": "...", "parameters": {...}, "layers": [...] }`
//!
//! Success bodies are GeoJSON FeatureCollections; failures are
//! `{ "error": <kind>, "detail": <message> }` with a status derived from the
//! error kind. POST bodies over [`MAX_BODY_BYTES`] are refused with 413.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use terramind_core::{ErrorKind, GeoError, OperationRequest};
use terramind_nlq::QueryPipeline;
use tokio::net::TcpListener;

/// Largest request body the server will buffer.
pub(crate) const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct QueryBody {
    query: String,
    /// Defaults to every layer the store knows.
    #[serde(default)]
    layers: Option<Vec<String>>,
}

pub async fn serve(pipeline: Arc<QueryPipeline>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {listen}: {e}"))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;
    tracing::info!(addr = %bound, "listening");
    eprintln!("terramind: listening on http://{bound}");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let pipeline = pipeline.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, pipeline.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    pipeline: Arc<QueryPipeline>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = if method == Method::POST {
        match read_body(req.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(resp) => return Ok(resp),
        }
    } else {
        Bytes::new()
    };
    tracing::debug!(method = %method, path = %path, bytes = body.len(), "request");
    Ok(route(&pipeline, &method, &path, &body).await)
}

/// Buffer at most `limit` bytes of `body`; anything larger or unreadable
/// becomes the error response to send back.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &serde_json::json!({
                "error": "payload_too_large",
                "detail": format!("request body exceeds {limit} bytes"),
            }),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            Err(json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": "bad_request", "detail": e.to_string() }),
            ))
        }
    }
}

async fn route(pipeline: &QueryPipeline, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n"),
        (&Method::GET, "/layers") => match pipeline.available_layers().await {
            Ok(layers) => json_response(StatusCode::OK, &serde_json::json!({ "layers": layers })),
            Err(e) => geo_error(&e),
        },
        (&Method::POST, "/query") => {
            let parsed: QueryBody = match parse_body(body) {
                Ok(v) => v,
                Err(e) => return geo_error(&e),
            };
            match pipeline.run_query(&parsed.query, parsed.layers).await {
                Ok(envelope) => json_response(StatusCode::OK, &envelope.to_json()),
                Err(e) => geo_error(&e),
            }
        }
        (&Method::POST, "/operation") => {
            let request: OperationRequest = match parse_body(body) {
                Ok(v) => v,
                Err(e) => return geo_error(&e),
            };
            match pipeline.run_operation(request).await {
                Ok(envelope) => json_response(StatusCode::OK, &envelope.to_json()),
                Err(e) => geo_error(&e),
            }
        }
        (_, "/healthz" | "/layers" | "/query" | "/operation") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "error": "method_not_allowed", "detail": format!("{method} {path}") }),
        ),
        _ => json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "error": "not_found", "detail": format!("no route for {path}") }),
        ),
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, GeoError> {
    serde_json::from_slice(body)
        .map_err(|e| GeoError::invalid(format!("request body is not valid JSON: {e}")))
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidOperation | ErrorKind::UnsupportedOperation => StatusCode::BAD_REQUEST,
        ErrorKind::EntityNotFound | ErrorKind::LayerNotFound => StatusCode::NOT_FOUND,
        ErrorKind::UninterpretableQuery | ErrorKind::GeometryComputationError => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::LayerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn geo_error(err: &GeoError) -> Response<Full<Bytes>> {
    let status = status_for(err.kind());
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    json_response(status, &err.to_payload())
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}
