//! Language-model oracle backends.
//!
//! Each networked backend sits behind its own cargo feature so a build can
//! carry only the clients it needs. All of them share one prompt contract
//! (see [`crate::oracle::system_prompt`]) and one reply parser.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
use serde_json::{json, Value};

use crate::config::env_value;
use crate::oracle::{
    parse_reply, system_prompt, user_prompt, InterpretationOracle, MockOracle, OracleError,
    OracleResponse,
};

pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";
pub const ANTHROPIC_VERSION_ENV: &str = "ANTHROPIC_VERSION";

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LlmBackend {
    /// Every interpretation request fails; only templates answer queries.
    #[default]
    Disabled,
    /// Deterministic keyword oracle (see [`MockOracle::heuristic`]).
    Mock,
    /// Local Ollama server via `/api/chat`.
    ///
    /// Defaults to IPv4 loopback; override with `OLLAMA_HOST`.
    #[cfg(feature = "llm-ollama")]
    Ollama { host: String },
    /// OpenAI chat completions. Requires `OPENAI_API_KEY`.
    #[cfg(feature = "llm-openai")]
    OpenAI { base_url: String },
    /// Anthropic messages API. Requires `ANTHROPIC_API_KEY`.
    #[cfg(feature = "llm-anthropic")]
    Anthropic { base_url: String },
}

impl LlmBackend {
    /// Parse a backend name, reading endpoint overrides from the environment.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "disabled" | "none" | "off" => Ok(Self::Disabled),
            "mock" => Ok(Self::Mock),
            "ollama" => {
                #[cfg(feature = "llm-ollama")]
                {
                    Ok(Self::Ollama {
                        host: default_ollama_host()?,
                    })
                }
                #[cfg(not(feature = "llm-ollama"))]
                {
                    return Err(anyhow!(
                        "ollama support not compiled (enable `terramind-nlq` feature `llm-ollama`)"
                    ));
                }
            }
            "openai" => {
                #[cfg(feature = "llm-openai")]
                {
                    Ok(Self::OpenAI {
                        base_url: default_openai_base_url()?,
                    })
                }
                #[cfg(not(feature = "llm-openai"))]
                {
                    return Err(anyhow!(
                        "openai support not compiled (enable `terramind-nlq` feature `llm-openai`)"
                    ));
                }
            }
            "anthropic" => {
                #[cfg(feature = "llm-anthropic")]
                {
                    Ok(Self::Anthropic {
                        base_url: default_anthropic_base_url()?,
                    })
                }
                #[cfg(not(feature = "llm-anthropic"))]
                {
                    return Err(anyhow!(
                        "anthropic support not compiled (enable `terramind-nlq` feature `llm-anthropic`)"
                    ));
                }
            }
            other => Err(anyhow!(
                "unknown LLM backend `{other}` (expected disabled|mock|ollama|openai|anthropic)"
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Mock => "mock",
            #[cfg(feature = "llm-ollama")]
            Self::Ollama { .. } => "ollama",
            #[cfg(feature = "llm-openai")]
            Self::OpenAI { .. } => "openai",
            #[cfg(feature = "llm-anthropic")]
            Self::Anthropic { .. } => "anthropic",
        }
    }

    /// Model used when none is configured explicitly.
    pub fn default_model(&self) -> Result<Option<String>> {
        Ok(match self {
            Self::Disabled | Self::Mock => None,
            #[cfg(feature = "llm-ollama")]
            Self::Ollama { .. } => Some(DEFAULT_OLLAMA_MODEL.to_string()),
            #[cfg(feature = "llm-openai")]
            Self::OpenAI { .. } => Some(
                env_value(OPENAI_MODEL_ENV)?.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            ),
            #[cfg(feature = "llm-anthropic")]
            Self::Anthropic { .. } => Some(
                env_value(ANTHROPIC_MODEL_ENV)?
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            ),
        })
    }
}

#[cfg(feature = "llm-ollama")]
fn normalize_ollama_host(host: &str) -> String {
    let mut host = host.trim().to_string();
    if host.is_empty() {
        // `localhost` may resolve to ::1 while Ollama listens on IPv4 only.
        host = DEFAULT_OLLAMA_HOST.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("http://{host}");
    }
    host.trim_end_matches('/').to_string()
}

#[cfg(feature = "llm-ollama")]
pub fn default_ollama_host() -> Result<String> {
    Ok(normalize_ollama_host(
        &env_value(OLLAMA_HOST_ENV)?.unwrap_or_default(),
    ))
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic"))]
fn normalize_http_base_url(base_url: &str, default: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    host.trim_end_matches('/').to_string()
}

#[cfg(feature = "llm-openai")]
pub fn default_openai_base_url() -> Result<String> {
    Ok(normalize_http_base_url(
        &env_value(OPENAI_BASE_URL_ENV)?.unwrap_or_default(),
        DEFAULT_OPENAI_BASE_URL,
    ))
}

#[cfg(feature = "llm-anthropic")]
pub fn default_anthropic_base_url() -> Result<String> {
    Ok(normalize_http_base_url(
        &env_value(ANTHROPIC_BASE_URL_ENV)?.unwrap_or_default(),
        DEFAULT_ANTHROPIC_BASE_URL,
    ))
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic"))]
fn api_key(env: &str, backend: &str) -> Result<String> {
    match env_value(env)? {
        Some(key) => Ok(key),
        None => Err(anyhow!(
            "{backend} backend requires {env} (set it in your env; do not hardcode secrets in scripts)"
        )),
    }
}

#[cfg(feature = "llm-anthropic")]
fn anthropic_extract_output_text(v: &Value) -> Option<String> {
    let mut out = String::new();
    let blocks = v.get("content")?.as_array()?;
    for b in blocks {
        if b.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        if let Some(t) = b.get("text").and_then(Value::as_str) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(t);
        }
    }
    let trimmed = out.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Build the oracle selected by `backend`.
pub fn build_oracle(
    backend: LlmBackend,
    model: Option<String>,
    max_output_tokens: u32,
) -> Result<Arc<dyn InterpretationOracle>> {
    if backend == LlmBackend::Mock {
        let oracle = MockOracle::heuristic()
            .map_err(|e| anyhow!("failed to build mock oracle: {e}"))?;
        return Ok(Arc::new(oracle));
    }
    Ok(Arc::new(LlmOracle::new(backend, model, max_output_tokens)?))
}

// ============================================================================
// LlmOracle
// ============================================================================

pub struct LlmOracle {
    backend: LlmBackend,
    model: String,
    #[cfg_attr(
        not(any(feature = "llm-openai", feature = "llm-anthropic")),
        allow(dead_code)
    )]
    max_output_tokens: u32,
    #[cfg_attr(
        not(any(feature = "llm-openai", feature = "llm-anthropic")),
        allow(dead_code)
    )]
    api_key: Option<String>,
    #[cfg_attr(not(feature = "llm-anthropic"), allow(dead_code))]
    anthropic_version: String,
    #[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
    client: reqwest::Client,
}

impl LlmOracle {
    /// Resolves credentials eagerly so misconfiguration fails at startup
    /// rather than on the first query.
    pub fn new(backend: LlmBackend, model: Option<String>, max_output_tokens: u32) -> Result<Self> {
        let model = match model {
            Some(model) => model,
            None => backend.default_model()?.unwrap_or_default(),
        };
        let api_key = match &backend {
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { .. } => Some(api_key(OPENAI_API_KEY_ENV, "OpenAI")?),
            #[cfg(feature = "llm-anthropic")]
            LlmBackend::Anthropic { .. } => Some(api_key(ANTHROPIC_API_KEY_ENV, "Anthropic")?),
            _ => None,
        };
        let anthropic_version = env_value(ANTHROPIC_VERSION_ENV)?
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string());

        Ok(Self {
            backend,
            model,
            max_output_tokens,
            api_key,
            anthropic_version,
            #[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
            client: reqwest::Client::builder()
                .build()
                .map_err(|e| anyhow!("failed to build http client: {e}"))?,
        })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[cfg(any(feature = "llm-openai", feature = "llm-anthropic"))]
    fn key(&self) -> Result<&str, OracleError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| OracleError::Config(format!("{} API key missing", self.backend.name())))
    }

    /// Send a request and decode the JSON body; non-2xx becomes `Http`.
    #[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
    async fn send(&self, url: &str, request: reqwest::RequestBuilder) -> Result<Value, OracleError> {
        let resp = request.send().await.map_err(|e| {
            OracleError::Transport(format!("failed to reach {} at {url}: {e}", self.backend.name()))
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OracleError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>().await.map_err(|e| {
            OracleError::InvalidReply(format!("{} returned invalid JSON: {e}", self.backend.name()))
        })
    }

    #[cfg(feature = "llm-ollama")]
    async fn ollama_chat(&self, host: &str, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{host}/api/chat");
        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "options": { "temperature": 0 },
            "format": "json"
        });

        let reply = match self.send(&url, self.client.post(&url).json(&body)).await {
            // Some Ollama versions only accept a JSON schema object in
            // `format`; retry once without it.
            Err(OracleError::Http { body: text, .. })
                if text.contains("invalid JSON schema in format") =>
            {
                let mut retry = body.clone();
                if let Some(obj) = retry.as_object_mut() {
                    obj.remove("format");
                }
                self.send(&url, self.client.post(&url).json(&retry)).await?
            }
            other => other?,
        };

        reply
            .pointer("/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OracleError::InvalidReply("ollama reply has no message content".into()))
    }

    #[cfg(feature = "llm-openai")]
    async fn openai_chat(&self, base_url: &str, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{base_url}/v1/chat/completions");
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": self.max_output_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });
        let request = self.client.post(&url).bearer_auth(self.key()?).json(&body);
        let reply = self.send(&url, request).await?;

        reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OracleError::InvalidReply("openai reply has no message content".into()))
    }

    #[cfg(feature = "llm-anthropic")]
    async fn anthropic_messages(
        &self,
        base_url: &str,
        system: &str,
        user: &str,
    ) -> Result<String, OracleError> {
        let url = format!("{base_url}/v1/messages");
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "temperature": 0,
            "system": system,
            "messages": [ { "role": "user", "content": user } ]
        });
        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.key()?)
            .header("anthropic-version", &self.anthropic_version)
            .json(&body);
        let reply = self.send(&url, request).await?;

        anthropic_extract_output_text(&reply).ok_or_else(|| {
            OracleError::InvalidReply("anthropic: no text blocks in response".into())
        })
    }
}

#[async_trait]
impl InterpretationOracle for LlmOracle {
    async fn interpret(
        &self,
        query: &str,
        available_layers: &[String],
    ) -> Result<OracleResponse, OracleError> {
        let system = system_prompt(available_layers);
        let user = user_prompt(query);
        tracing::debug!(backend = self.backend.name(), model = %self.model, "calling language model");

        let text = match &self.backend {
            LlmBackend::Disabled => return Err(OracleError::Disabled),
            LlmBackend::Mock => {
                return Err(OracleError::Config(
                    "mock backend is served by MockOracle, not LlmOracle".into(),
                ))
            }
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host } => self.ollama_chat(host, &system, &user).await?,
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { base_url } => self.openai_chat(base_url, &system, &user).await?,
            #[cfg(feature = "llm-anthropic")]
            LlmBackend::Anthropic { base_url } => {
                self.anthropic_messages(base_url, &system, &user).await?
            }
        };
        parse_reply(&text)
    }

    fn describe(&self) -> String {
        if self.model.is_empty() {
            self.backend.name().to_string()
        } else {
            format!("{}:{}", self.backend.name(), self.model)
        }
    }
}
