//! Chat orchestration.
//!
//! `ChatService` sequences a chat turn: persist the prompt, assemble
//! the context window, consult the semantic cache, fall back to
//! retrieval-augmented generation on a miss, then commit the finalized
//! message and updated session tokens in one transaction. Exactly three
//! durable writes happen per turn — the initial message insert, the
//! optional cache insert, and the transactional batch — so a crash
//! mid-flow never loses the prompt and a provider failure leaves the
//! turn retryable.

use std::sync::Arc;
use std::time::Instant;

use crate::catalog;
use crate::context::{self, ContextWindowPolicy};
use crate::core::config::ChatConfig;
use crate::core::errors::ChatError;
use crate::models::{CacheItem, Message, Session};
use crate::partition::PartitionKey;
use crate::provider::CompletionProvider;
use crate::store::{CacheStore, ChatStore, ProductStore};
use crate::tokens;

pub struct ChatService {
    provider: Arc<dyn CompletionProvider>,
    chat_store: ChatStore,
    cache: CacheStore,
    products: ProductStore,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        chat_store: ChatStore,
        cache: CacheStore,
        products: ProductStore,
        config: ChatConfig,
    ) -> Self {
        Self {
            provider,
            chat_store,
            cache,
            products,
            config,
        }
    }

    /// Run one chat turn and return the finalized message.
    ///
    /// The cache key is the embedding of the newline-joined prompt text
    /// of the context window — prompts only, newest-bounded — so two
    /// conversations reaching the same prompt sequence at the same
    /// depth share a cache entry.
    pub async fn get_completion(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
        prompt_text: &str,
    ) -> Result<Message, ChatError> {
        let started = Instant::now();
        let key = PartitionKey::session(tenant_id, user_id, session_id);

        // Persist the prompt before anything can fail; a provider error
        // later leaves this message valid to retry against.
        let prompt_tokens = tokens::count(prompt_text) as i64;
        let mut message = Message::new(tenant_id, user_id, session_id, prompt_tokens, prompt_text);
        self.chat_store.insert_message(&message).await?;

        let window = self.build_context_window(&key).await?;

        let prompts: String = window
            .iter()
            .map(|m| m.prompt.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let vectors = self.provider.embed(&prompts).await?;

        match self
            .cache
            .lookup(&vectors, self.config.cache_similarity_score)
            .await?
        {
            Some(cached) => {
                tracing::debug!(session_id, "semantic cache hit");
                message.cache_hit = true;
                message.completion = cached;
            }
            None => {
                let results = self
                    .products
                    .vector_search(&vectors, self.config.product_max_results)
                    .await?;
                let serialized: Vec<String> =
                    results.iter().map(|r| r.product.to_rag_json()).collect();
                let rag_data =
                    tokens::trim_records(&serialized, self.config.max_rag_tokens).join("\n");

                let rag = self
                    .provider
                    .complete_with_retrieval(&window, &rag_data)
                    .await?;
                message.completion = rag.completion;
                message.generation_tokens = rag.generation_tokens;
                message.completion_tokens = rag.completion_tokens;

                self.cache
                    .put(&CacheItem::new(vectors, prompts, message.completion.clone()))
                    .await?;
            }
        }

        message.elapsed_ms = started.elapsed().as_millis() as i64;

        // Completion + generation tokens combined are the cost of the
        // turn; commit them with the finalized message atomically.
        let mut session = self.chat_store.get_session(&key).await?;
        session.tokens += message.completion_tokens + message.generation_tokens;
        self.chat_store
            .upsert_session_and_message(&session, &message)
            .await?;

        Ok(message)
    }

    async fn build_context_window(&self, key: &PartitionKey) -> Result<Vec<Message>, ChatError> {
        match self.config.context_policy {
            ContextWindowPolicy::Depth => {
                self.chat_store
                    .get_context_window(key, self.config.max_context_window)
                    .await
            }
            ContextWindowPolicy::Tokens => {
                let history = self.chat_store.get_session_messages(key).await?;
                Ok(context::bound_by_tokens(
                    history,
                    self.config.max_context_tokens,
                ))
            }
        }
    }

    pub async fn create_session(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Session, ChatError> {
        let session = Session::new(tenant_id, user_id);
        self.chat_store.insert_session(&session).await?;
        Ok(session)
    }

    pub async fn get_sessions(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<Session>, ChatError> {
        self.chat_store
            .get_sessions(&PartitionKey::user(tenant_id, user_id))
            .await
    }

    pub async fn get_session_messages(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        self.chat_store
            .get_session_messages(&PartitionKey::session(tenant_id, user_id, session_id))
            .await
    }

    pub async fn rename_session(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
        name: &str,
    ) -> Result<(), ChatError> {
        let key = PartitionKey::session(tenant_id, user_id, session_id);
        let mut session = self.chat_store.get_session(&key).await?;
        session.name = name.to_string();
        self.chat_store
            .upsert_batch(&[crate::store::BatchOp::UpsertSession(session)])
            .await
    }

    /// Summarize the transcript into a short label and rename the
    /// session to it.
    pub async fn summarize_session_name(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<String, ChatError> {
        let messages = self
            .get_session_messages(tenant_id, user_id, session_id)
            .await?;

        let transcript: String = messages
            .iter()
            .map(|m| format!("{} {}", m.prompt, m.completion))
            .collect::<Vec<_>>()
            .join(" ");

        let label = self.provider.summarize(&transcript).await?;
        self.rename_session(tenant_id, user_id, session_id, &label)
            .await?;
        Ok(label)
    }

    pub async fn delete_session(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), ChatError> {
        self.chat_store
            .delete_session_and_messages(&PartitionKey::session(tenant_id, user_id, session_id))
            .await
    }

    pub async fn clear_cache(&self) -> Result<(), ChatError> {
        self.cache.clear().await
    }

    pub async fn remove_cache_entry(&self, vectors: &[f32]) -> Result<bool, ChatError> {
        self.cache.remove_nearest(vectors).await
    }

    /// Load the product catalog on first run. A non-empty product store
    /// skips the load entirely.
    pub async fn initialize(&self, catalog_source: Option<&str>) -> Result<(), ChatError> {
        if self.products.count().await? > 0 {
            tracing::debug!("product catalog already loaded");
            return Ok(());
        }

        match catalog_source {
            Some(url) => {
                let report = catalog::load_from_url(&self.products, url).await?;
                tracing::info!("catalog initialized: {} products", report.loaded);
                Ok(())
            }
            None => {
                tracing::warn!("no product catalog source configured; retrieval will be empty");
                Ok(())
            }
        }
    }
}
