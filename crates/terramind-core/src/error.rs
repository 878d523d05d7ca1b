//! Error taxonomy shared by every TerraMind crate.
//!
//! Each variant maps onto a stable [`ErrorKind`] so that callers at the
//! boundary (CLI, HTTP) can tell "bad input" from "transient data problem"
//! from "the oracle could not help" without string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for TerraMind operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    /// Malformed or missing parameters, empty layer list, unknown layer names.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Neither a template nor the oracle produced a usable operation.
    #[error("uninterpretable query: {0}")]
    UninterpretableQuery(String),

    /// Named-place resolution failed.
    #[error("entity not found: `{name}` (searched {searched})")]
    EntityNotFound { name: String, searched: String },

    /// The layer store has no layer with this name.
    #[error("layer not found: `{0}`")]
    LayerNotFound(String),

    /// The layer exists but could not be read or parsed.
    #[error("layer `{layer}` unavailable: {reason}")]
    LayerUnavailable { layer: String, reason: String },

    /// The operation kind is not one the engine can execute.
    #[error("unsupported operation: `{0}`")]
    UnsupportedOperation(String),

    /// A geometric computation failed (malformed geometry, empty input, ...).
    #[error("geometry computation error: {0}")]
    GeometryComputation(String),
}

/// Machine-distinguishable error kinds surfaced at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidOperation,
    UninterpretableQuery,
    EntityNotFound,
    LayerNotFound,
    LayerUnavailable,
    UnsupportedOperation,
    GeometryComputationError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidOperation => "invalid_operation",
            ErrorKind::UninterpretableQuery => "uninterpretable_query",
            ErrorKind::EntityNotFound => "entity_not_found",
            ErrorKind::LayerNotFound => "layer_not_found",
            ErrorKind::LayerUnavailable => "layer_unavailable",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
            ErrorKind::GeometryComputationError => "geometry_computation_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GeoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeoError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            GeoError::UninterpretableQuery(_) => ErrorKind::UninterpretableQuery,
            GeoError::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            GeoError::LayerNotFound(_) => ErrorKind::LayerNotFound,
            GeoError::LayerUnavailable { .. } => ErrorKind::LayerUnavailable,
            GeoError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            GeoError::GeometryComputation(_) => ErrorKind::GeometryComputationError,
        }
    }

    /// Body used by error responses: `{ "error": kind, "detail": message }`.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.kind(),
            detail: self.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        GeoError::InvalidOperation(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        GeoError::GeometryComputation(msg.into())
    }
}

/// Wire shape of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorKind,
    pub detail: String,
}

pub type Result<T, E = GeoError> = std::result::Result<T, E>;
