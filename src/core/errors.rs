use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not found: {0}")]
    NotFound(String),
    /// A batch write was asked to span more than one partition key.
    /// Programming error, never retried.
    #[error("partition mismatch: {0}")]
    PartitionMismatch(String),
    /// Embedding, completion or retrieval backend failed or timed out.
    /// Retryable by the caller; the prompt message persisted before the
    /// provider call remains valid to retry against.
    #[error("provider unavailable: {0}")]
    Provider(String),
    #[error("malformed upstream data: {0}")]
    MalformedData(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Internal(err.to_string())
    }

    pub fn provider<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Provider(err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Provider(_))
    }
}
