//! OpenAI-compatible HTTP adapter for the completion provider.
//!
//! Talks to the `/v1/chat/completions` and `/v1/embeddings` endpoints.
//! Transport failures and non-success statuses map to the retryable
//! provider error.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{window_to_turns, ChatTurn, CompletionProvider, RagCompletion};
use crate::core::config::ProviderConfig;
use crate::core::errors::ChatError;
use crate::models::Message;

/// Instructs the model for chat turns; retrieval data is appended when
/// present.
const SYSTEM_PROMPT: &str = "You are an AI assistant that helps people find information. \
    Provide concise answers that are polite and professional.";

/// Instructs the model for session-name summarization.
const SUMMARIZE_PROMPT: &str = "Summarize this text. One to three words maximum length. \
    Plain text only. No punctuation, markup or tags.";

pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ChatError::internal)?;
        Ok(Self { config, client })
    }

    async fn chat_request(&self, turns: Vec<ChatTurn>) -> Result<Value, ChatError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = json!({
            "model": self.config.completion_model,
            "messages": turns,
            "temperature": 0.2,
            "top_p": 0.7,
            "max_tokens": 1000,
            "stream": false,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(ChatError::provider)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Provider(format!(
                "chat completion failed ({}): {}",
                status, text
            )));
        }

        res.json().await.map_err(ChatError::provider)
    }

    fn completion_text(payload: &Value) -> Result<String, ChatError> {
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                ChatError::MalformedData("completion response missing message content".into())
            })
    }

    /// Split reported usage into generation cost (input side) and
    /// completion cost (returned text only).
    fn usage_split(payload: &Value) -> (i64, i64) {
        let usage = &payload["usage"];
        let total = usage["total_tokens"].as_i64().unwrap_or(0);
        let completion = usage["completion_tokens"].as_i64().unwrap_or(0);
        (total - completion, completion)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError> {
        let url = format!(
            "{}/v1/embeddings",
            self.config.base_url.trim_end_matches('/')
        );

        let body = json!({
            "model": self.config.embedding_model,
            "input": text,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(ChatError::provider)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Provider(format!(
                "embedding request failed ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ChatError::provider)?;
        let vectors: Vec<f32> = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ChatError::MalformedData("embedding response missing vector".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vectors.len() != self.config.embedding_dimensions {
            return Err(ChatError::MalformedData(format!(
                "embedding dimensionality {} does not match configured {}",
                vectors.len(),
                self.config.embedding_dimensions
            )));
        }

        Ok(vectors)
    }

    async fn complete(&self, window: &[Message]) -> Result<(String, i64), ChatError> {
        let mut turns = vec![ChatTurn::new("system", SYSTEM_PROMPT)];
        turns.extend(window_to_turns(window));

        let payload = self.chat_request(turns).await?;
        let completion = Self::completion_text(&payload)?;
        let tokens = payload["usage"]["total_tokens"].as_i64().unwrap_or(0);
        Ok((completion, tokens))
    }

    async fn complete_with_retrieval(
        &self,
        window: &[Message],
        rag_data: &str,
    ) -> Result<RagCompletion, ChatError> {
        let system = if rag_data.is_empty() {
            SYSTEM_PROMPT.to_string()
        } else {
            format!("{}\n\nRetrieved product data:\n{}", SYSTEM_PROMPT, rag_data)
        };

        let mut turns = vec![ChatTurn::new("system", system)];
        turns.extend(window_to_turns(window));

        let payload = self.chat_request(turns).await?;
        let completion = Self::completion_text(&payload)?;
        let (generation_tokens, completion_tokens) = Self::usage_split(&payload);

        Ok(RagCompletion {
            completion,
            generation_tokens,
            completion_tokens,
        })
    }

    async fn summarize(&self, text: &str) -> Result<String, ChatError> {
        let turns = vec![
            ChatTurn::new("system", SUMMARIZE_PROMPT),
            ChatTurn::new("user", text),
        ];

        let payload = self.chat_request(turns).await?;
        Self::completion_text(&payload)
    }
}
