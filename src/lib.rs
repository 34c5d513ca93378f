//! RAG chat backend with a semantic completion cache.
//!
//! The crate turns a user prompt into a bounded conversational context
//! window, consults an embedding-keyed completion cache, falls back to
//! retrieval-augmented generation on a miss, and persists session state
//! and message history transactionally in a partitioned store.

pub mod catalog;
pub mod chat;
pub mod context;
pub mod core;
pub mod logging;
pub mod models;
pub mod partition;
pub mod provider;
pub mod store;
pub mod tokens;
pub mod vector_math;

pub use crate::chat::ChatService;
pub use crate::core::config::AppConfig;
pub use crate::core::errors::ChatError;
