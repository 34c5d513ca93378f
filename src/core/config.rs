//! Configuration for the chat pipeline, provider and stores.
//!
//! Every section has usable defaults so the crate runs without a config
//! file; `AppConfig::from_toml_file` overlays values from disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::ContextWindowPolicy;
use crate::core::errors::ChatError;

/// Tuning for the chat orchestration pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum conversation depth for the depth-bounded context window.
    pub max_context_window: usize,
    /// Cosine similarity a cache entry must exceed to count as a hit.
    pub cache_similarity_score: f32,
    /// Maximum product records returned by retrieval.
    pub product_max_results: usize,
    /// Token budget for serialized retrieval data sent to the model.
    pub max_rag_tokens: usize,
    /// Token budget for the token-bounded context window policy.
    pub max_context_tokens: i64,
    /// Which context window policy to apply.
    pub context_policy: ContextWindowPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_window: 3,
            cache_similarity_score: 0.99,
            product_max_results: 10,
            max_rag_tokens: 2500,
            max_context_tokens: 500,
            context_policy: ContextWindowPolicy::Depth,
        }
    }
}

/// Connection settings for the OpenAI-compatible completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub completion_model: String,
    pub embedding_model: String,
    /// Fixed dimensionality of the embedding model output.
    pub embedding_dimensions: usize,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            completion_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimensions: 1536,
            request_timeout_secs: 60,
        }
    }
}

/// Locations for durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_dir: PathBuf,
    pub log_dir: PathBuf,
    /// URL of the JSON product catalog loaded on first run.
    pub product_data_source: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            product_data_source: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub provider: ProviderConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ChatError> {
        let raw = std::fs::read_to_string(path).map_err(ChatError::internal)?;
        toml::from_str(&raw)
            .map_err(|e| ChatError::MalformedData(format!("config {}: {}", path.display(), e)))
    }
}
