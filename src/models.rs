//! Durable entities: chat sessions, messages, cache items and products.
//!
//! Session and Message share a hierarchical partition
//! (tenant → user → session) and are the unit of transactional
//! consistency. Cache items are content-addressed by embedding and carry
//! no session linkage. Products live in their own category-partitioned
//! store and are read-only from the chat pipeline's perspective.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::partition::PartitionKey;

/// A chat session owned by one `(tenant, user)` pair.
///
/// `session_id` doubles as the entity id. `tokens` is the running cost
/// counter for the session and only ever increases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    pub name: String,
    pub tokens: i64,
}

impl Session {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            session_id: id.clone(),
            id,
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            name: "New Chat".to_string(),
            tokens: 0,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::session(&self.tenant_id, &self.user_id, &self.session_id)
    }
}

/// One conversational turn.
///
/// Created with an empty completion the instant the user prompt arrives,
/// finalized exactly once by the transaction that also updates the
/// owning session. `generation_tokens` is the input-side cost of
/// producing the completion; `completion_tokens` counts only the
/// returned text, which re-enters future context windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub prompt_tokens: i64,
    pub completion: String,
    pub completion_tokens: i64,
    pub generation_tokens: i64,
    pub cache_hit: bool,
    pub elapsed_ms: i64,
}

impl Message {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        prompt_tokens: i64,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            prompt: prompt.into(),
            prompt_tokens,
            completion: String::new(),
            completion_tokens: 0,
            generation_tokens: 0,
            cache_hit: false,
            elapsed_ms: 0,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::session(&self.tenant_id, &self.user_id, &self.session_id)
    }
}

/// A cached completion keyed by the embedding of the prompt sequence
/// that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    pub id: String,
    pub vectors: Vec<f32>,
    pub prompts: String,
    pub completion: String,
}

impl CacheItem {
    pub fn new(
        vectors: Vec<f32>,
        prompts: impl Into<String>,
        completion: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vectors,
            prompts: prompts.into(),
            completion: completion.into(),
        }
    }
}

/// Catalog entity, partitioned by `category_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub category_id: String,
    pub category_name: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub vectors: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub customer: String,
    pub rating: i32,
    pub review: String,
}

impl Product {
    /// Serialized form sent to the model as retrieval data. Vectors are
    /// stripped; they are meaningless to the completion model and blow
    /// the token budget.
    pub fn to_rag_json(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("vectors");
        }
        value.to_string()
    }
}
