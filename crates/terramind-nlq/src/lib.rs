//! TerraMind natural-language query layer
//!
//! Turns a plain-English geographic question into an executed spatial
//! operation:
//!
//! ```text
//!   "cities within 50 miles of San Francisco"
//!        │
//!        ▼
//!   TemplateMatcher ──(no match)──► FallbackInterpreter ──► InterpretationOracle
//!        │                                   │                 (mock | ollama | openai | anthropic)
//!        └──────────► OperationRequest ◄─────┘
//!                          │ validate (terramind-core)
//!                          ▼
//!                   EntityResolver  (named targets → features)
//!                          │
//!                          ▼
//!           LayerStore::fetch_layer × N  ──►  SpatialEngine  ──►  ResultEnvelope
//! ```
//!
//! [`QueryPipeline`] wires the pieces; everything else is usable on its own.

pub mod config;
pub mod fallback;
pub mod llm;
pub mod oracle;
pub mod pipeline;
pub mod resolver;
pub mod templates;

pub use fallback::FallbackInterpreter;
pub use llm::{build_oracle, LlmBackend, LlmOracle};
pub use oracle::{InterpretationOracle, MockOracle, OracleError, OracleResponse};
pub use pipeline::{Interpretation, QueryPipeline, GAZETTEER_LAYERS};
pub use resolver::{EntityResolver, Resolution, ResolverConfig};
pub use templates::{ParameterExtractor, QueryTemplate, TemplateMatch, TemplateMatcher, TEMPLATES};
