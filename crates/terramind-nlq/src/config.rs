//! Environment-driven settings.
//!
//! Every helper resolves with the same precedence:
//! 1) explicit override (usually a CLI flag)
//! 2) environment variable
//! 3) built-in default
//!
//! Blank variables count as unset; malformed ones are errors, never silently
//! replaced by the default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const TERRAMIND_DATA_DIR_ENV: &str = "TERRAMIND_DATA_DIR";
pub const TERRAMIND_LLM_BACKEND_ENV: &str = "TERRAMIND_LLM_BACKEND";
pub const TERRAMIND_LLM_MODEL_ENV: &str = "TERRAMIND_LLM_MODEL";
pub const TERRAMIND_LLM_TIMEOUT_SECS_ENV: &str = "TERRAMIND_LLM_TIMEOUT_SECS";
pub const TERRAMIND_LLM_MAX_OUTPUT_TOKENS_ENV: &str = "TERRAMIND_LLM_MAX_OUTPUT_TOKENS";
pub const TERRAMIND_PREFERRED_COUNTRY_ENV: &str = "TERRAMIND_PREFERRED_COUNTRY";

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_LLM_BACKEND: &str = "disabled";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LLM_MAX_OUTPUT_TOKENS: u32 = 800;
pub const DEFAULT_PREFERRED_COUNTRY: &str = "United States";

const MAX_LLM_OUTPUT_TOKENS: u32 = 32_000;

/// Trimmed value of `name`; `None` when unset or blank.
pub(crate) fn env_value(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            Ok((!v.is_empty()).then(|| v.to_string()))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow!("failed to read {name}: {e}")),
    }
}

pub fn data_dir(override_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    Ok(env_value(TERRAMIND_DATA_DIR_ENV)?
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)))
}

/// Name of the oracle backend (`disabled`, `mock`, `ollama`, `openai`,
/// `anthropic`), lower-cased.
pub fn llm_backend_name(override_name: Option<&str>) -> Result<String> {
    let name = match override_name.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name.to_string(),
        None => env_value(TERRAMIND_LLM_BACKEND_ENV)?
            .unwrap_or_else(|| DEFAULT_LLM_BACKEND.to_string()),
    };
    Ok(name.to_ascii_lowercase())
}

/// Explicit model choice, if any. Backends fill in their own default.
pub fn llm_model(override_model: Option<String>) -> Result<Option<String>> {
    match override_model.filter(|m| !m.trim().is_empty()) {
        Some(model) => Ok(Some(model.trim().to_string())),
        None => env_value(TERRAMIND_LLM_MODEL_ENV),
    }
}

/// Oracle timeout. Zero is rejected: an oracle call must always be bounded.
pub fn llm_timeout(override_secs: Option<u64>) -> Result<Duration> {
    let secs = match override_secs {
        Some(secs) => secs,
        None => match env_value(TERRAMIND_LLM_TIMEOUT_SECS_ENV)? {
            Some(v) => parse_timeout_secs(&v)?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        },
    };
    if secs == 0 {
        return Err(anyhow!(
            "LLM timeout must be at least 1 second (got 0; see {TERRAMIND_LLM_TIMEOUT_SECS_ENV})"
        ));
    }
    Ok(Duration::from_secs(secs))
}

pub(crate) fn parse_timeout_secs(v: &str) -> Result<u64> {
    v.trim().parse::<u64>().map_err(|_| {
        anyhow!(
            "invalid {TERRAMIND_LLM_TIMEOUT_SECS_ENV}={v:?} (expected integer seconds, at least 1)"
        )
    })
}

pub fn llm_max_output_tokens() -> Result<u32> {
    match env_value(TERRAMIND_LLM_MAX_OUTPUT_TOKENS_ENV)? {
        Some(v) => parse_max_output_tokens(&v),
        None => Ok(DEFAULT_LLM_MAX_OUTPUT_TOKENS),
    }
}

/// `0` means "use the default"; large values are capped.
pub(crate) fn parse_max_output_tokens(v: &str) -> Result<u32> {
    let parsed = v.trim().parse::<u32>().map_err(|_| {
        anyhow!(
            "invalid {TERRAMIND_LLM_MAX_OUTPUT_TOKENS_ENV}={v:?} (expected integer tokens, e.g. 800)"
        )
    })?;
    Ok(match parsed {
        0 => DEFAULT_LLM_MAX_OUTPUT_TOKENS,
        n => n.min(MAX_LLM_OUTPUT_TOKENS),
    })
}

pub fn preferred_country(override_country: Option<&str>) -> Result<String> {
    match override_country.map(str::trim).filter(|s| !s.is_empty()) {
        Some(country) => Ok(country.to_string()),
        None => Ok(env_value(TERRAMIND_PREFERRED_COUNTRY_ENV)?
            .unwrap_or_else(|| DEFAULT_PREFERRED_COUNTRY.to_string())),
    }
}
