//! TerraMind layer store
//!
//! Layers are named, read-only feature collections. The engine never reads
//! files itself; everything goes through a [`LayerStore`]:
//!
//! ```text
//!   QueryPipeline ──fetch_layers(["rivers", "lakes"])──► LayerStore
//!                                                         ├─ DirectoryLayerStore  <root>/<name>.geojson
//!                                                         └─ MemoryLayerStore     (tests, embedding)
//! ```
//!
//! Loaded layers are `Arc<[Feature]>` and never mutated, so a cache can hand
//! the same allocation to any number of concurrent requests.

mod directory;


use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use terramind_core::{Feature, GeoError, Layer, Result};

pub use directory::DirectoryLayerStore;

// ============================================================================
// Store Interface
// ============================================================================

#[async_trait]
pub trait LayerStore: Send + Sync {
    /// Unknown names fail with `LayerNotFound`; unreadable or malformed data
    /// with `LayerUnavailable`.
    async fn fetch_layer(&self, name: &str) -> Result<Layer>;

    /// Names of every layer this store can serve, sorted.
    async fn layer_names(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<S: LayerStore + ?Sized> LayerStore for Arc<S> {
    async fn fetch_layer(&self, name: &str) -> Result<Layer> {
        (**self).fetch_layer(name).await
    }

    async fn layer_names(&self) -> Result<Vec<String>> {
        (**self).layer_names().await
    }
}

/// Fetch all `names` concurrently. The first failure aborts the whole set.
pub async fn fetch_layers<S>(store: &S, names: &[String]) -> Result<Vec<Layer>>
where
    S: LayerStore + ?Sized,
{
    let layers = try_join_all(names.iter().map(|name| store.fetch_layer(name))).await?;
    tracing::debug!(layers = ?names, "layers fetched");
    Ok(layers)
}

/// Concatenate layers in declared order.
pub fn concat_layers(layers: &[Layer]) -> Vec<Feature> {
    layers.iter().flat_map(|l| l.iter().cloned()).collect()
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct MemoryLayerStore {
    layers: BTreeMap<String, Layer>,
}

impl MemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, name: impl Into<String>, features: Vec<Feature>) -> Self {
        self.insert(name, features);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, features: Vec<Feature>) {
        self.layers.insert(name.into(), Layer::from(features));
    }
}

#[async_trait]
impl LayerStore for MemoryLayerStore {
    async fn fetch_layer(&self, name: &str) -> Result<Layer> {
        self.layers
            .get(name)
            .cloned()
            .ok_or_else(|| GeoError::LayerNotFound(name.to_string()))
    }

    async fn layer_names(&self) -> Result<Vec<String>> {
        Ok(self.layers.keys().cloned().collect())
    }
}
