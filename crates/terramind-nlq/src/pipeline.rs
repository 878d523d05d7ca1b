//! The query pipeline: question (or structured operation) in, result
//! envelope out.
//!
//! ```text
//!   query ─► templates ─┬─► OperationRequest ─► validate ─► resolve target ─► fetch layers ─► engine
//!                       └─► oracle fallback ─┘
//! ```

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use terramind_core::{
    BoundOperation, Feature, GeoError, InterpretationSource, Operation, OperationRequest, Result,
    ResultEnvelope, TargetRef,
};
use terramind_engine::SpatialEngine;
use terramind_store::{concat_layers, fetch_layers, LayerStore};
use uuid::Uuid;

use crate::fallback::FallbackInterpreter;
use crate::resolver::EntityResolver;
use crate::templates::TemplateMatcher;

/// Reference layers searched for place names when no `targetLayer` is given.
pub const GAZETTEER_LAYERS: &[&str] = &["states", "cities"];

/// An operation request plus how it was obtained. Not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    #[serde(rename = "operation")]
    pub request: OperationRequest,
    pub source: InterpretationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Template placeholders the query did not supply.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl Interpretation {
    pub fn direct(request: OperationRequest) -> Self {
        Self {
            request,
            source: InterpretationSource::Direct,
            explanation: None,
            confidence: None,
            unresolved: Vec::new(),
        }
    }
}

pub struct QueryPipeline {
    store: Arc<dyn LayerStore>,
    templates: TemplateMatcher,
    fallback: Option<FallbackInterpreter>,
    resolver: EntityResolver,
    engine: SpatialEngine,
}

impl QueryPipeline {
    /// Templates only; attach an oracle with [`QueryPipeline::with_fallback`].
    pub fn new(store: Arc<dyn LayerStore>) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            templates: TemplateMatcher::new()
                .map_err(|e| anyhow!("invalid template pattern: {e}"))?,
            fallback: None,
            resolver: EntityResolver::default(),
            engine: SpatialEngine::default(),
        })
    }

    pub fn with_fallback(mut self, fallback: FallbackInterpreter) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_engine(mut self, engine: SpatialEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn store(&self) -> &Arc<dyn LayerStore> {
        &self.store
    }

    pub fn templates(&self) -> &TemplateMatcher {
        &self.templates
    }

    pub fn fallback(&self) -> Option<&FallbackInterpreter> {
        self.fallback.as_ref()
    }

    pub async fn available_layers(&self) -> Result<Vec<String>> {
        self.store.layer_names().await
    }

    /// Templates first, then the oracle. Nothing is validated or executed.
    pub async fn interpret(&self, query: &str, available_layers: &[String]) -> Result<Interpretation> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GeoError::UninterpretableQuery("query is empty".to_string()));
        }

        if let Some(m) = self.templates.match_query(query) {
            tracing::info!(pattern_id = m.pattern_id, kind = %m.request.kind, "template matched");
            return Ok(Interpretation {
                explanation: Some(format!(
                    "{} on {} (template `{}`)",
                    m.request.kind,
                    m.request.layers.join(", "),
                    m.pattern_id
                )),
                confidence: Some(1.0),
                source: InterpretationSource::Template {
                    pattern_id: m.pattern_id.to_string(),
                },
                request: m.request,
                unresolved: m.unresolved,
            });
        }

        match &self.fallback {
            Some(fallback) => fallback.interpret(query, available_layers).await,
            None => Err(GeoError::UninterpretableQuery(format!(
                "no template matches `{query}` and no oracle is configured"
            ))),
        }
    }

    /// Interpret and execute. `available_layers` defaults to the store's.
    pub async fn run_query(
        &self,
        query: &str,
        available_layers: Option<Vec<String>>,
    ) -> Result<ResultEnvelope> {
        let available = match available_layers {
            Some(layers) => layers,
            None => self.available_layers().await?,
        };
        let interpretation = self.interpret(query, &available).await?;
        self.execute(interpretation, &available).await
    }

    /// Execute a structured request with no interpretation step.
    pub async fn run_operation(&self, request: OperationRequest) -> Result<ResultEnvelope> {
        let available = self.available_layers().await?;
        self.execute(Interpretation::direct(request), &available).await
    }

    pub async fn execute(
        &self,
        interpretation: Interpretation,
        available_layers: &[String],
    ) -> Result<ResultEnvelope> {
        let Interpretation {
            request,
            source,
            explanation,
            confidence,
            unresolved,
        } = interpretation;

        let operation = Operation::from_request(&request, available_layers)
            .map_err(|err| with_unresolved_hint(err, &unresolved))?;
        let kind = operation.kind();
        let bound = self.bind(operation, available_layers).await?;

        let layers = fetch_layers(self.store.as_ref(), &bound.layers).await?;
        let features = concat_layers(&layers);
        tracing::info!(kind = %kind, layers = ?bound.layers, features = features.len(), "layers fetched");

        let engine = self.engine;
        let results = tokio::task::spawn_blocking(move || engine.execute(&bound, &features))
            .await
            .map_err(|e| GeoError::geometry(format!("engine task failed: {e}")))??;

        let request_id = Uuid::new_v4().to_string();
        tracing::info!(request_id = %request_id, kind = %kind, results = results.len(), "request complete");

        Ok(ResultEnvelope {
            results,
            operation_kind: kind,
            explanation,
            confidence,
            source,
            request_id,
        })
    }

    /// Replace a named target with the resolved feature.
    async fn bind(&self, operation: Operation<TargetRef>, available: &[String]) -> Result<BoundOperation> {
        let resolved = match operation.target() {
            Some(TargetRef::Named { name, layer }) => {
                let layers = candidate_layers(layer.as_deref(), &operation.layers, available);
                Some(self.resolve_named(name, &layers).await?)
            }
            _ => None,
        };
        operation.try_map_target(|target| match target {
            TargetRef::Geometry(feature) => Ok(feature),
            TargetRef::Named { name, .. } => resolved.ok_or_else(|| GeoError::EntityNotFound {
                name,
                searched: "no layers".to_string(),
            }),
        })
    }

    async fn resolve_named(&self, name: &str, layers: &[String]) -> Result<Feature> {
        for layer in layers {
            let features = self.store.fetch_layer(layer).await?;
            match self.resolver.resolve(name, layer, &features) {
                Ok(resolution) => {
                    tracing::info!(name = %name, layer = %layer, rule = resolution.rule, "target resolved");
                    return Ok(resolution.feature.clone());
                }
                Err(GeoError::EntityNotFound { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(GeoError::EntityNotFound {
            name: name.trim().to_string(),
            searched: if layers.is_empty() {
                "no layers".to_string()
            } else {
                layers.join(", ")
            },
        })
    }
}

/// `targetLayer` alone when given; otherwise the operation's layers, then the
/// gazetteer layers the store knows, without repeats.
fn candidate_layers(target_layer: Option<&str>, op_layers: &[String], available: &[String]) -> Vec<String> {
    if let Some(layer) = target_layer {
        return vec![layer.to_string()];
    }
    let gazetteer = GAZETTEER_LAYERS
        .iter()
        .map(|s| s.to_string())
        .filter(|g| available.contains(g));
    let mut out: Vec<String> = Vec::new();
    for layer in op_layers.iter().cloned().chain(gazetteer) {
        if !out.contains(&layer) {
            out.push(layer);
        }
    }
    out
}

fn with_unresolved_hint(err: GeoError, unresolved: &[String]) -> GeoError {
    match err {
        GeoError::InvalidOperation(msg) if !unresolved.is_empty() => GeoError::InvalidOperation(
            format!("{msg} (could not extract {} from the query)", unresolved.join(", ")),
        ),
        other => other,
    }
}
