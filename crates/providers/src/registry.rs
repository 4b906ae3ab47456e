//! Provider registry built once at daemon boot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use paseo_domain::{Error, Result};

use crate::metadata::MetadataModel;
use crate::traits::AgentProvider;

/// A model advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Registry of agent providers plus the optional cheap metadata model.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AgentProvider>>,
    metadata: Option<Arc<MetadataModel>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            metadata: None,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn AgentProvider>) {
        let id = provider.id().to_string();
        tracing::info!(provider = %id, "provider registered");
        self.providers.insert(id, provider);
    }

    pub fn set_metadata_model(&mut self, model: MetadataModel) {
        self.metadata = Some(Arc::new(model));
    }

    /// The cheap model used for title/branch/commit-message generation.
    pub fn metadata_model(&self) -> Option<Arc<MetadataModel>> {
        self.metadata.clone()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AgentProvider>> {
        self.providers.get(id).cloned().ok_or_else(|| Error::Provider {
            provider: id.to_string(),
            message: "unknown provider".into(),
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Models across all providers, sorted by provider then id.
    pub async fn list_models(&self) -> Vec<ModelEntry> {
        let mut all = Vec::new();
        for provider in self.providers.values() {
            match provider.list_models().await {
                Ok(mut models) => all.append(&mut models),
                Err(e) => {
                    tracing::warn!(provider = provider.id(), error = %e, "list_models failed");
                }
            }
        }
        all.sort_by(|a, b| (a.provider.as_str(), a.id.as_str()).cmp(&(b.provider.as_str(), b.id.as_str())));
        all
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
