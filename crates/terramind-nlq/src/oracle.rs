//! Interpretation oracles: anything that can turn a free-form question into
//! a structured operation request.
//!
//! Implementations: [`MockOracle`] for tests and offline use,
//! [`crate::llm::LlmOracle`] for chat-completion backends.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use terramind_core::{OperationKind, OperationRequest};

use crate::templates::ParameterExtractor;

/// What an oracle must return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub operation: OperationRequest,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("interpretation oracle is disabled")]
    Disabled,
    #[error("oracle configuration error: {0}")]
    Config(String),
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("oracle http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("oracle reply is not a usable interpretation: {0}")]
    InvalidReply(String),
    #[error("oracle declined: {0}")]
    Declined(String),
}

#[async_trait]
pub trait InterpretationOracle: Send + Sync {
    async fn interpret(
        &self,
        query: &str,
        available_layers: &[String],
    ) -> Result<OracleResponse, OracleError>;

    /// Short label for logs and response metadata (e.g. `openai:gpt-4o-mini`).
    fn describe(&self) -> String;
}

// ============================================================================
// Prompt contract
// ============================================================================

pub fn system_prompt(available_layers: &[String]) -> String {
    let kinds = OperationKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You translate geographic questions into one spatial operation.\n\
         Reply with a single JSON object and nothing else:\n\
         {{\"operation\": {{\"type\": <one of {kinds}>, \"parameters\": {{...}}, \"layers\": [<layer names>]}}, \
         \"explanation\": <one sentence>, \"confidence\": <number between 0 and 1>}}\n\
         Available layers: {layers}.\n\
         Parameters by type:\n\
         - BUFFER: distance (number), units (miles|kilometers|meters|feet|nautical_miles)\n\
         - WITHIN: target (place name) or targetGeometry (GeoJSON), targetLayer (optional), distance, units\n\
         - TOUCHES / INTERSECTS: target (place name) or targetGeometry (GeoJSON), targetLayer (optional)\n\
         - AREA_FILTER: minArea (number), units (square_miles|square_kilometers|square_meters|acres|hectares)\n\
         - UNION / DIFFERENCE: no parameters; the first layer's features are combined or subtracted in order\n\
         Only use layers from the available list.",
        layers = if available_layers.is_empty() {
            "(none)".to_string()
        } else {
            available_layers.join(", ")
        }
    )
}

pub fn user_prompt(query: &str) -> String {
    format!("Question: {}", query.trim())
}

/// Parse a raw model reply, tolerating code fences and chatter around the
/// JSON object.
pub fn parse_reply(text: &str) -> Result<OracleResponse, OracleError> {
    let json = extract_json_object(text)
        .ok_or_else(|| OracleError::InvalidReply("no JSON object in reply".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| OracleError::InvalidReply(format!("reply is not valid JSON: {e}")))?;
    // Some models return the operation at the top level.
    let value = if value.get("operation").is_none() && value.get("type").is_some() {
        serde_json::json!({ "operation": value })
    } else {
        value
    };
    serde_json::from_value(value)
        .map_err(|e| OracleError::InvalidReply(format!("unexpected reply shape: {e}")))
}

/// Outermost `{ ... }` span, skipping a surrounding code fence if present.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        t = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    let start = t.find('{')?;
    let end = t.rfind('}')?;
    (end > start).then(|| &t[start..=end])
}

// ============================================================================
// Mock oracle
// ============================================================================

/// Deterministic oracle for tests and offline demos.
///
/// With canned replies it returns them in order (cycling). Without, it makes
/// a keyword-level guess: the first operation word in the query plus every
/// available layer the query mentions.
pub struct MockOracle {
    replies: Vec<Result<OracleResponse, OracleError>>,
    next: AtomicUsize,
    extractor: Option<ParameterExtractor>,
}

impl MockOracle {
    pub fn canned(replies: Vec<Result<OracleResponse, OracleError>>) -> Self {
        Self {
            replies,
            next: AtomicUsize::new(0),
            extractor: None,
        }
    }

    pub fn heuristic() -> Result<Self, regex::Error> {
        Ok(Self {
            replies: Vec::new(),
            next: AtomicUsize::new(0),
            extractor: Some(ParameterExtractor::new()?),
        })
    }

    /// Number of `interpret` calls served so far.
    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    fn guess(&self, query: &str, available_layers: &[String]) -> Result<OracleResponse, OracleError> {
        let q = query.to_lowercase();
        const KEYWORDS: &[(&str, &str)] = &[
            ("buffer", "BUFFER"),
            ("around", "BUFFER"),
            ("near", "NEAR"),
            ("within", "WITHIN"),
            ("touch", "TOUCHES"),
            ("adjacent", "TOUCHES"),
            ("border", "TOUCHES"),
            ("intersect", "INTERSECTS"),
            ("cross", "INTERSECTS"),
            ("area", "AREA_FILTER"),
            ("larger", "AREA_FILTER"),
            ("union", "UNION"),
            ("merge", "UNION"),
            ("difference", "DIFFERENCE"),
            ("minus", "DIFFERENCE"),
        ];
        let kind = KEYWORDS
            .iter()
            .filter_map(|(kw, kind)| q.find(kw).map(|pos| (pos, *kind)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, kind)| kind)
            .ok_or_else(|| OracleError::Declined("no operation keyword".to_string()))?;

        let layers: Vec<String> = available_layers
            .iter()
            .filter(|l| {
                let l = l.to_lowercase();
                q.contains(&l) || q.contains(l.trim_end_matches('s'))
            })
            .cloned()
            .collect();
        if layers.is_empty() {
            return Err(OracleError::Declined("no known layer mentioned".to_string()));
        }

        let mut request = OperationRequest {
            kind: kind.to_string(),
            parameters: Default::default(),
            layers,
        };
        if let Some(extractor) = &self.extractor {
            let e = extractor.extract(query);
            let wants_target = matches!(kind, "NEAR" | "WITHIN" | "TOUCHES" | "INTERSECTS");
            let wants_distance = matches!(kind, "NEAR" | "WITHIN" | "BUFFER");
            if let (true, Some(location)) = (wants_target, e.location) {
                request = request.with_parameter("target", location);
            }
            if let (true, Some(distance)) = (wants_distance, e.distance) {
                request = request.with_parameter("distance", distance);
            }
            if let (true, Some(area)) = (kind == "AREA_FILTER", e.area) {
                request = request.with_parameter("minArea", area);
            }
        }

        Ok(OracleResponse {
            operation: request,
            explanation: Some(format!("keyword guess: {kind}")),
            confidence: Some(0.3),
        })
    }
}

#[async_trait]
impl InterpretationOracle for MockOracle {
    async fn interpret(
        &self,
        query: &str,
        available_layers: &[String],
    ) -> Result<OracleResponse, OracleError> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        if self.replies.is_empty() {
            return self.guess(query, available_layers);
        }
        self.replies[i % self.replies.len()].clone()
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
