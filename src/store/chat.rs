//! Session and message persistence.
//!
//! Both entity types share the hierarchical partition key and are the
//! unit of transactional consistency: the finalize path upserts an
//! updated session and its finalized message in one transaction via a
//! tagged batch validated to stay inside a single partition.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use super::open_pool;
use crate::core::errors::ChatError;
use crate::models::{Message, Session};
use crate::partition::PartitionKey;

/// One operation in a transactional batch. All operations in a batch
/// must target the same full partition key.
#[derive(Debug, Clone)]
pub enum BatchOp {
    UpsertSession(Session),
    UpsertMessage(Message),
    DeleteById { key: PartitionKey, id: String },
}

impl BatchOp {
    fn partition_key(&self) -> PartitionKey {
        match self {
            BatchOp::UpsertSession(session) => session.partition_key(),
            BatchOp::UpsertMessage(message) => message.partition_key(),
            BatchOp::DeleteById { key, .. } => key.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn new(db_path: &Path) -> Result<Self, ChatError> {
        let pool = open_pool(db_path).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                name TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                prompt TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion TEXT NOT NULL DEFAULT '',
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                generation_tokens INTEGER NOT NULL DEFAULT 0,
                cache_hit INTEGER NOT NULL DEFAULT 0,
                elapsed_ms INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_partition
             ON sessions(tenant_id, user_id, session_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_partition
             ON messages(tenant_id, user_id, session_id, timestamp)",
        )
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    /// Create a session. Fails if the id already exists.
    pub async fn insert_session(&self, session: &Session) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO sessions (id, tenant_id, user_id, session_id, name, tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&session.id)
        .bind(&session.tenant_id)
        .bind(&session.user_id)
        .bind(&session.session_id)
        .bind(&session.name)
        .bind(session.tokens)
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    /// Create a message. Fails if the id already exists.
    pub async fn insert_message(&self, message: &Message) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO messages (id, tenant_id, user_id, session_id, timestamp, prompt,
                prompt_tokens, completion, completion_tokens, generation_tokens,
                cache_hit, elapsed_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(&message.user_id)
        .bind(&message.session_id)
        .bind(format_timestamp(&message.timestamp))
        .bind(&message.prompt)
        .bind(message.prompt_tokens)
        .bind(&message.completion)
        .bind(message.completion_tokens)
        .bind(message.generation_tokens)
        .bind(message.cache_hit)
        .bind(message.elapsed_ms)
        .execute(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        Ok(())
    }

    pub async fn get_session(&self, key: &PartitionKey) -> Result<Session, ChatError> {
        let session_id = require_session_id(key)?;

        let row = sqlx::query(
            "SELECT * FROM sessions
             WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(key.tenant_id())
        .bind(key.user_id().unwrap_or_default())
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        match row {
            Some(row) => row_to_session(&row),
            None => Err(ChatError::NotFound(format!("session {}", session_id))),
        }
    }

    /// All sessions under a tenant+user (or tenant-only) partial key.
    pub async fn get_sessions(&self, key: &PartitionKey) -> Result<Vec<Session>, ChatError> {
        let rows = if let Some(user_id) = key.user_id() {
            sqlx::query(
                "SELECT * FROM sessions WHERE tenant_id = ?1 AND user_id = ?2
                 ORDER BY session_id",
            )
            .bind(key.tenant_id())
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query("SELECT * FROM sessions WHERE tenant_id = ?1 ORDER BY session_id")
                .bind(key.tenant_id())
                .fetch_all(&self.pool)
                .await
        }
        .map_err(ChatError::internal)?;

        rows.iter().map(row_to_session).collect()
    }

    /// Every message in the session, ascending by timestamp.
    pub async fn get_session_messages(&self, key: &PartitionKey) -> Result<Vec<Message>, ChatError> {
        let session_id = require_session_id(key)?;

        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3
             ORDER BY timestamp ASC",
        )
        .bind(key.tenant_id())
        .bind(key.user_id().unwrap_or_default())
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        rows.iter().map(row_to_message).collect()
    }

    /// The most recent `limit` messages, re-sorted ascending so the
    /// caller gets a chronological window ending at the newest turn.
    pub async fn get_context_window(
        &self,
        key: &PartitionKey,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let session_id = require_session_id(key)?;

        let rows = sqlx::query(
            "SELECT * FROM (
                 SELECT * FROM messages
                 WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3
                 ORDER BY timestamp DESC LIMIT ?4
             ) ORDER BY timestamp ASC",
        )
        .bind(key.tenant_id())
        .bind(key.user_id().unwrap_or_default())
        .bind(session_id)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::internal)?;

        rows.iter().map(row_to_message).collect()
    }

    /// Execute a batch of operations in one transaction. Every
    /// operation must target the same full partition key; a mixed batch
    /// fails fast before touching the store.
    pub async fn upsert_batch(&self, ops: &[BatchOp]) -> Result<(), ChatError> {
        let Some(first) = ops.first() else {
            return Ok(());
        };

        let key = first.partition_key();
        if !key.is_full() {
            return Err(ChatError::PartitionMismatch(
                "batch operations require a full partition key".into(),
            ));
        }
        for op in ops {
            if op.partition_key() != key {
                return Err(ChatError::PartitionMismatch(
                    "all batch operations must share one partition key".into(),
                ));
            }
        }

        let mut tx = self.pool.begin().await.map_err(ChatError::internal)?;

        for op in ops {
            match op {
                BatchOp::UpsertSession(session) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO sessions
                            (id, tenant_id, user_id, session_id, name, tokens)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .bind(&session.id)
                    .bind(&session.tenant_id)
                    .bind(&session.user_id)
                    .bind(&session.session_id)
                    .bind(&session.name)
                    .bind(session.tokens)
                    .execute(&mut *tx)
                    .await
                    .map_err(ChatError::internal)?;
                }
                BatchOp::UpsertMessage(message) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO messages
                            (id, tenant_id, user_id, session_id, timestamp, prompt,
                             prompt_tokens, completion, completion_tokens,
                             generation_tokens, cache_hit, elapsed_ms)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    )
                    .bind(&message.id)
                    .bind(&message.tenant_id)
                    .bind(&message.user_id)
                    .bind(&message.session_id)
                    .bind(format_timestamp(&message.timestamp))
                    .bind(&message.prompt)
                    .bind(message.prompt_tokens)
                    .bind(&message.completion)
                    .bind(message.completion_tokens)
                    .bind(message.generation_tokens)
                    .bind(message.cache_hit)
                    .bind(message.elapsed_ms)
                    .execute(&mut *tx)
                    .await
                    .map_err(ChatError::internal)?;
                }
                BatchOp::DeleteById { id, .. } => {
                    sqlx::query("DELETE FROM messages WHERE id = ?1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(ChatError::internal)?;
                    sqlx::query("DELETE FROM sessions WHERE id = ?1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(ChatError::internal)?;
                }
            }
        }

        tx.commit().await.map_err(ChatError::internal)?;
        Ok(())
    }

    /// Upsert an updated session and its finalized message atomically.
    pub async fn upsert_session_and_message(
        &self,
        session: &Session,
        message: &Message,
    ) -> Result<(), ChatError> {
        self.upsert_batch(&[
            BatchOp::UpsertSession(session.clone()),
            BatchOp::UpsertMessage(message.clone()),
        ])
        .await
    }

    /// Delete a session and every message in its partition. Tolerates
    /// sessions that never received a message.
    pub async fn delete_session_and_messages(&self, key: &PartitionKey) -> Result<(), ChatError> {
        let session_id = require_session_id(key)?;

        let mut tx = self.pool.begin().await.map_err(ChatError::internal)?;

        sqlx::query(
            "DELETE FROM messages
             WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(key.tenant_id())
        .bind(key.user_id().unwrap_or_default())
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(ChatError::internal)?;

        sqlx::query(
            "DELETE FROM sessions
             WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(key.tenant_id())
        .bind(key.user_id().unwrap_or_default())
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(ChatError::internal)?;

        tx.commit().await.map_err(ChatError::internal)?;
        Ok(())
    }
}

/// RFC3339 with fixed microsecond precision so lexicographic order in
/// SQL matches chronological order.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn require_session_id(key: &PartitionKey) -> Result<&str, ChatError> {
    key.session_id().ok_or_else(|| {
        ChatError::PartitionMismatch("operation requires a session-level partition key".into())
    })
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, ChatError> {
    Ok(Session {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        name: row.get("name"),
        tokens: row.get("tokens"),
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, ChatError> {
    let raw_timestamp: String = row.get("timestamp");
    let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(ChatError::internal)?;

    Ok(Message {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        timestamp,
        prompt: row.get("prompt"),
        prompt_tokens: row.get("prompt_tokens"),
        completion: row.get("completion"),
        completion_tokens: row.get("completion_tokens"),
        generation_tokens: row.get("generation_tokens"),
        cache_hit: row.get("cache_hit"),
        elapsed_ms: row.get("elapsed_ms"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (ChatStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::new(&dir.path().join("chat.db")).await.unwrap();
        (store, dir)
    }

    fn seeded_message(session: &str, prompt: &str) -> Message {
        Message::new("t1", "u1", session, 3, prompt)
    }

    #[tokio::test]
    async fn session_round_trips_through_insert_and_get() {
        let (store, _dir) = test_store().await;

        let session = Session::new("t1", "u1");
        store.insert_session(&session).await.unwrap();

        let key = session.partition_key();
        let loaded = store.get_session(&key).await.unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let (store, _dir) = test_store().await;

        let key = PartitionKey::session("t1", "u1", "nope");
        let err = store.get_session(&key).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_session_insert_fails() {
        let (store, _dir) = test_store().await;

        let session = Session::new("t1", "u1");
        store.insert_session(&session).await.unwrap();
        assert!(store.insert_session(&session).await.is_err());
    }

    #[tokio::test]
    async fn context_window_is_bounded_and_chronological() {
        let (store, _dir) = test_store().await;

        for i in 0..5 {
            let mut msg = seeded_message("s1", &format!("prompt {}", i));
            msg.timestamp = Utc::now() + chrono::Duration::milliseconds(i);
            store.insert_message(&msg).await.unwrap();
        }

        let key = PartitionKey::session("t1", "u1", "s1");
        let window = store.get_context_window(&key, 3).await.unwrap();

        assert_eq!(window.len(), 3);
        let prompts: Vec<&str> = window.iter().map(|m| m.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["prompt 2", "prompt 3", "prompt 4"]);
        assert!(window.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn batch_commits_session_and_message_together() {
        let (store, _dir) = test_store().await;

        let mut session = Session::new("t1", "u1");
        store.insert_session(&session).await.unwrap();

        let mut message = seeded_message(&session.session_id, "question");
        store.insert_message(&message).await.unwrap();

        message.completion = "answer".to_string();
        message.completion_tokens = 5;
        message.generation_tokens = 7;
        session.tokens += message.completion_tokens + message.generation_tokens;

        store
            .upsert_session_and_message(&session, &message)
            .await
            .unwrap();

        let key = session.partition_key();
        assert_eq!(store.get_session(&key).await.unwrap().tokens, 12);
        let messages = store.get_session_messages(&key).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].completion, "answer");
    }

    #[tokio::test]
    async fn cross_partition_batch_fails_fast() {
        let (store, _dir) = test_store().await;

        let session = Session::new("t1", "u1");
        let stray = seeded_message("other-session", "question");

        let err = store
            .upsert_batch(&[
                BatchOp::UpsertSession(session),
                BatchOp::UpsertMessage(stray),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PartitionMismatch(_)));
    }

    #[tokio::test]
    async fn delete_removes_session_and_all_messages() {
        let (store, _dir) = test_store().await;

        let session = Session::new("t1", "u1");
        store.insert_session(&session).await.unwrap();
        for i in 0..3 {
            store
                .insert_message(&seeded_message(&session.session_id, &format!("p{}", i)))
                .await
                .unwrap();
        }

        let key = session.partition_key();
        store.delete_session_and_messages(&key).await.unwrap();

        assert!(matches!(
            store.get_session(&key).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(store.get_session_messages(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_tolerates_zero_message_sessions() {
        let (store, _dir) = test_store().await;

        let session = Session::new("t1", "u1");
        store.insert_session(&session).await.unwrap();
        store
            .delete_session_and_messages(&session.partition_key())
            .await
            .unwrap();
    }
}
