//! The slow path: ask an oracle when no template matches.

use std::sync::Arc;
use std::time::Duration;

use terramind_core::{GeoError, InterpretationSource, OperationKind, Result};

use crate::oracle::InterpretationOracle;
use crate::pipeline::Interpretation;

pub struct FallbackInterpreter {
    oracle: Arc<dyn InterpretationOracle>,
    timeout: Duration,
}

impl FallbackInterpreter {
    pub fn new(oracle: Arc<dyn InterpretationOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    pub fn backend(&self) -> String {
        self.oracle.describe()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Every oracle failure (error, timeout, unknown type) surfaces as
    /// `UninterpretableQuery`. The returned request is not yet validated.
    pub async fn interpret(&self, query: &str, available_layers: &[String]) -> Result<Interpretation> {
        let backend = self.oracle.describe();
        tracing::info!(backend = %backend, "no template matched; asking oracle");

        let call = self.oracle.interpret(query, available_layers);
        let reply = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                tracing::warn!(backend = %backend, error = %err, "oracle failed");
                return Err(GeoError::UninterpretableQuery(err.to_string()));
            }
            Err(_) => {
                tracing::warn!(backend = %backend, timeout_secs = self.timeout.as_secs_f64(), "oracle timed out");
                return Err(GeoError::UninterpretableQuery(format!(
                    "oracle `{backend}` timed out after {:.1}s",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let mut request = reply.operation;
        request.kind = canonical_kind(&request.kind)?.as_str().to_string();

        Ok(Interpretation {
            request,
            source: InterpretationSource::Oracle { backend },
            explanation: reply
                .explanation
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            confidence: reply
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0)),
            unresolved: Vec::new(),
        })
    }
}

/// Oracle spelling of an operation type; `NEAR` is an alias for WITHIN.
pub(crate) fn canonical_kind(raw: &str) -> Result<OperationKind> {
    let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    if normalized == "NEAR" {
        return Ok(OperationKind::Within);
    }
    OperationKind::parse(&normalized).map_err(|_| {
        GeoError::UninterpretableQuery(format!("oracle returned unknown operation type `{raw}`"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MockOracle, OracleError, OracleResponse};
    use async_trait::async_trait;
    use terramind_core::{ErrorKind, OperationRequest};

    fn reply(kind: &str, confidence: Option<f64>) -> OracleResponse {
        OracleResponse {
            operation: OperationRequest {
                kind: kind.to_string(),
                parameters: Default::default(),
                layers: vec!["parks".to_string()],
            },
            explanation: Some("  parks near the target  ".to_string()),
            confidence,
        }
    }

    fn fallback(replies: Vec<std::result::Result<OracleResponse, OracleError>>) -> FallbackInterpreter {
        FallbackInterpreter::new(Arc::new(MockOracle::canned(replies)), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn near_maps_to_within() {
        let i = fallback(vec![Ok(reply("near", Some(0.7)))])
            .interpret("parks close to Denver", &[])
            .await
            .unwrap();
        assert_eq!(i.request.kind, "WITHIN");
        assert_eq!(i.explanation.as_deref(), Some("parks near the target"));
        assert_eq!(i.confidence, Some(0.7));
        assert_eq!(
            i.source,
            InterpretationSource::Oracle {
                backend: "mock".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_type_is_uninterpretable() {
        let err = fallback(vec![Ok(reply("TELEPORT", None))])
            .interpret("q", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
    }

    #[tokio::test]
    async fn oracle_errors_are_uninterpretable() {
        let err = fallback(vec![Err(OracleError::InvalidReply("garbage".into()))])
            .interpret("q", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
        assert!(err.to_string().contains("garbage"));
    }

    #[tokio::test]
    async fn confidence_is_clamped() {
        let f = fallback(vec![Ok(reply("UNION", Some(4.0))), Ok(reply("UNION", Some(f64::NAN)))]);
        assert_eq!(f.interpret("q", &[]).await.unwrap().confidence, Some(1.0));
        assert_eq!(f.interpret("q", &[]).await.unwrap().confidence, None);
    }

    struct StalledOracle;

    #[async_trait]
    impl InterpretationOracle for StalledOracle {
        async fn interpret(
            &self,
            _query: &str,
            _available_layers: &[String],
        ) -> std::result::Result<OracleResponse, OracleError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(OracleError::Declined("woke up".into()))
        }

        fn describe(&self) -> String {
            "stalled".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_uninterpretable() {
        let f = FallbackInterpreter::new(Arc::new(StalledOracle), Duration::from_secs(2));
        let err = f.interpret("q", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UninterpretableQuery);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn kind_spellings() {
        assert_eq!(canonical_kind("area filter").unwrap(), OperationKind::AreaFilter);
        assert_eq!(canonical_kind(" intersects ").unwrap(), OperationKind::Intersects);
        assert!(canonical_kind("").is_err());
    }
}
