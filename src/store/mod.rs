//! SQLite-backed document stores.
//!
//! Three independent stores mirror the three partitioned containers of
//! the data model: chat (sessions + messages, the transactional unit),
//! cache (semantic completion cache) and product (catalog with
//! embeddings). Embedding vectors are stored as little-endian f32
//! blobs; similarity search is a brute-force cosine scan.

pub mod cache;
pub mod chat;
pub mod product;

pub use cache::CacheStore;
pub use chat::{BatchOp, ChatStore};
pub use product::{ProductSearchResult, ProductStore};

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::core::errors::ChatError;

pub(crate) async fn open_pool(db_path: &Path) -> Result<SqlitePool, ChatError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(ChatError::internal)
}

pub(crate) fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
