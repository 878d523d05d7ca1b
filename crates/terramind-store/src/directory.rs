//! Layers served from a directory of GeoJSON files.
//!
//! `<root>/<name>.geojson` (or `<name>.json`) holds layer `<name>`. Parsed
//! layers are cached for the life of the store unless caching is disabled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use terramind_core::{features_from_geojson_str, GeoError, Layer, Result};

use crate::LayerStore;

const EXTENSIONS: [&str; 2] = ["geojson", "json"];

#[derive(Debug)]
pub struct DirectoryLayerStore {
    root: PathBuf,
    cache: Option<RwLock<HashMap<String, Layer>>>,
}

impl DirectoryLayerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Some(RwLock::new(HashMap::new())),
        }
    }

    /// Re-read and re-parse the file on every fetch.
    pub fn without_cache(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cached(&self, name: &str) -> Option<Layer> {
        self.cache.as_ref()?.read().get(name).cloned()
    }

    async fn locate(&self, name: &str) -> Result<PathBuf> {
        if !is_plain_name(name) {
            return Err(GeoError::LayerNotFound(name.to_string()));
        }
        for ext in EXTENSIONS {
            let path = self.root.join(format!("{name}.{ext}"));
            let exists = tokio::fs::try_exists(&path).await.map_err(|e| {
                tracing::warn!(layer = %name, path = %path.display(), error = %e, "cannot stat layer file");
                GeoError::LayerUnavailable {
                    layer: name.to_string(),
                    reason: format!("cannot check {}: {e}", path.display()),
                }
            })?;
            if exists {
                return Ok(path);
            }
        }
        Err(GeoError::LayerNotFound(name.to_string()))
    }
}

/// Layer names may not escape the root directory.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[async_trait]
impl LayerStore for DirectoryLayerStore {
    async fn fetch_layer(&self, name: &str) -> Result<Layer> {
        if let Some(layer) = self.cached(name) {
            return Ok(layer);
        }

        let path = self.locate(name).await?;
        let unavailable = |reason: String| GeoError::LayerUnavailable {
            layer: name.to_string(),
            reason,
        };

        let text = tokio::fs::read_to_string(&path).await.map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "failed to read layer file");
            unavailable(err.to_string())
        })?;
        let features = tokio::task::spawn_blocking(move || features_from_geojson_str(&text))
            .await
            .map_err(|err| unavailable(format!("parser task failed: {err}")))?
            .map_err(|err| {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse layer file");
                unavailable(err.to_string())
            })?;

        let layer = Layer::from(features);
        tracing::info!(layer = %name, features = layer.len(), "layer loaded");

        Ok(match &self.cache {
            // A concurrent load may have won; keep whichever landed first.
            Some(cache) => cache
                .write()
                .entry(name.to_string())
                .or_insert(layer)
                .clone(),
            None => layer,
        })
    }

    async fn layer_names(&self) -> Result<Vec<String>> {
        let unavailable = |err: std::io::Error| GeoError::LayerUnavailable {
            layer: self.root.display().to_string(),
            reason: err.to_string(),
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(unavailable)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            let is_layer = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if !is_layer {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_plain_name(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
