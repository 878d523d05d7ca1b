//! TerraMind core data model
//!
//! Shared vocabulary for every TerraMind crate:
//!
//! ```text
//!   OperationRequest ──validate──► Operation<TargetRef> ──resolve──► Operation<Feature>
//!   (templates, oracle,              (closed sum type,                 (what the engine
//!    inbound JSON)                    per-kind parameters)              executes)
//!
//!   Feature / Layer ─────────────────────────────────────► OpResult ──► ResultEnvelope
//! ```
//!
//! Nothing here performs I/O or geometry; see `terramind-store` and
//! `terramind-engine` for those.

pub mod error;
pub mod feature;
pub mod operation;
pub mod result;
pub mod units;

pub use error::{ErrorKind, ErrorPayload, GeoError, Result};
pub use feature::{
    feature_from_json_value, features_from_geojson, features_from_geojson_str, Feature, Layer,
    NAME_FIELDS,
};
pub use operation::{
    AreaFilterParams, BoundOperation, BufferParams, Operation, OperationKind, OperationRequest,
    OperationSpec, TargetRef, WithinParams,
};
pub use result::{InterpretationSource, OpResult, ResultEnvelope, ENGINE_TAG};
pub use units::{AreaUnit, LinearUnit};
