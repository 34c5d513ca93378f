//! Semantic completion cache.
//!
//! Entries are keyed by the embedding of the prompt sequence that
//! produced them, not by the latest prompt alone, so two conversations
//! reaching the same prompt sequence at the same depth share an entry.
//! The cache is session-independent and has no locking discipline;
//! concurrent near-duplicate inserts are a tolerated inefficiency.

use std::path::Path;

use sqlx::{Row, SqlitePool};

use super::{deserialize_embedding, open_pool, serialize_embedding};
use crate::core::errors::ChatError;
use crate::models::CacheItem;
use crate::vector_math::rank_descending_by_cosine;

/// Similarity treated as an exact match for point deletion.
const EXACT_MATCH_SCORE: f32 = 0.99;

#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub async fn new(db_path: &Path) -> Result<Self, ChatError> {
        let pool = open_pool(db_path).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_items (
                id TEXT PRIMARY KEY,
                vectors BLOB NOT NULL,
                prompts TEXT NOT NULL,
                completion TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    /// Return the completion of the single closest entry with
    /// similarity strictly greater than `threshold`, or `None`.
    ///
    /// Entries are ranked in insertion order with a stable sort, so
    /// ties resolve to the first maximal-similarity record.
    pub async fn lookup(
        &self,
        vectors: &[f32],
        threshold: f32,
    ) -> Result<Option<String>, ChatError> {
        let rows = sqlx::query("SELECT vectors, completion FROM cache_items ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        let mut candidates = Vec::with_capacity(rows.len());
        let mut completions: Vec<String> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vectors");
            candidates.push(deserialize_embedding(&blob));
            completions.push(row.get("completion"));
        }

        Ok(rank_descending_by_cosine(vectors, &candidates)
            .first()
            .filter(|(_, score)| *score > threshold)
            .map(|(idx, _)| completions[*idx].clone()))
    }

    /// Insert a cache entry. Every call creates a new record; duplicate
    /// near-identical vectors accumulate until explicitly purged.
    pub async fn put(&self, item: &CacheItem) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO cache_items (id, vectors, prompts, completion)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&item.id)
        .bind(serialize_embedding(&item.vectors))
        .bind(&item.prompts)
        .bind(&item.completion)
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    /// Delete at most one entry whose similarity to `vectors` exceeds
    /// the exact-match threshold. No-op if none qualifies.
    pub async fn remove_nearest(&self, vectors: &[f32]) -> Result<bool, ChatError> {
        let rows = sqlx::query("SELECT id, vectors FROM cache_items ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        let mut candidates = Vec::with_capacity(rows.len());
        let mut ids: Vec<String> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vectors");
            candidates.push(deserialize_embedding(&blob));
            ids.push(row.get("id"));
        }

        let Some(id) = rank_descending_by_cosine(vectors, &candidates)
            .first()
            .filter(|(_, score)| *score > EXACT_MATCH_SCORE)
            .map(|(idx, _)| &ids[*idx])
        else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM cache_items WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(true)
    }

    /// Delete every entry. Administrative operation; not transactional
    /// with respect to concurrent inserts.
    pub async fn clear(&self) -> Result<(), ChatError> {
        sqlx::query("DELETE FROM cache_items")
            .execute(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(())
    }

    pub async fn count(&self) -> Result<usize, ChatError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_items")
            .fetch_one(&self.pool)
            .await
            .map_err(ChatError::internal)?;

        Ok(count as usize)
    }
}
