//! Completion provider boundary.
//!
//! Everything the pipeline needs from a language model goes through
//! this trait: embedding generation, plain chat completion,
//! retrieval-augmented completion and transcript summarization. The
//! shipped implementation is the OpenAI-compatible HTTP adapter in
//! `openai`; tests substitute their own.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ChatError;
use crate::models::Message;

/// Wire-format chat turn for completion requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Outcome of a retrieval-augmented completion.
///
/// `generation_tokens` is the input-side cost (system prompt, retrieval
/// data and context window); `completion_tokens` counts only the
/// returned text. They are tracked separately because completion text
/// re-enters future context windows and must be budgeted precisely,
/// while generation cost is a one-time charge against the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RagCompletion {
    pub completion: String,
    pub generation_tokens: i64,
    pub completion_tokens: i64,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// provider name for logs (e.g. "openai")
    fn name(&self) -> &str;

    /// generate an embedding vector for a text span
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError>;

    /// plain chat completion over a context window
    async fn complete(&self, window: &[Message]) -> Result<(String, i64), ChatError>;

    /// retrieval-augmented completion; token counts reported separately
    async fn complete_with_retrieval(
        &self,
        window: &[Message],
        rag_data: &str,
    ) -> Result<RagCompletion, ChatError>;

    /// short label for a conversation transcript
    async fn summarize(&self, text: &str) -> Result<String, ChatError>;
}

/// Flatten a context window into wire-format turns. Completions that
/// have not been generated yet are skipped.
pub fn window_to_turns(window: &[Message]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(window.len() * 2);
    for message in window {
        turns.push(ChatTurn::new("user", &message.prompt));
        if !message.completion.is_empty() {
            turns.push(ChatTurn::new("assistant", &message.completion));
        }
    }
    turns
}
