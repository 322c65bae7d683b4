//! Redis-backed embedding cache and chat history.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::cache::EmbeddingCache;
use crate::error::{KnowledgeError, Result};
use crate::history::{ChatHistory, ChatMessage};

/// Key prefix of chat history lists.
pub const HISTORY_KEY_PREFIX: &str = "message_store:";

/// Default lifetime of a cached embedding.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const BACKEND: &str = "redis";

async fn connect(url: &str) -> redis::RedisResult<MultiplexedConnection> {
    redis::Client::open(url)?.get_multiplexed_async_connection().await
}

fn cache_error(e: impl std::fmt::Display) -> KnowledgeError {
    KnowledgeError::CacheError { backend: BACKEND.into(), message: e.to_string() }
}

fn storage_error(e: impl std::fmt::Display) -> KnowledgeError {
    KnowledgeError::storage(BACKEND, e.to_string())
}

/// Embedding vectors stored as JSON strings with a TTL.
#[derive(Clone)]
pub struct RedisEmbeddingCache {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisEmbeddingCache {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::CacheError`] if the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = connect(url).await.map_err(cache_error)?;
        Ok(Self { conn, ttl: DEFAULT_CACHE_TTL })
    }

    /// Expire entries after `ttl` (rounded down to whole seconds, at least one).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl EmbeddingCache for RedisEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(cache_error)?;
        raw.map(|json| serde_json::from_str(&json).map_err(cache_error)).transpose()
    }

    async fn put(&self, key: &str, embedding: &[f32]) -> Result<()> {
        let json = serde_json::to_string(embedding).map_err(cache_error)?;
        let mut conn = self.conn.clone();
        let seconds = self.ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, json, seconds).await.map_err(cache_error)?;
        debug!(key, seconds, "cached embedding");
        Ok(())
    }
}

/// Chat sessions stored as Redis lists of JSON messages.
#[derive(Clone)]
pub struct RedisChatHistory {
    conn: MultiplexedConnection,
    ttl: Option<Duration>,
}

impl RedisChatHistory {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::StorageError`] if the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = connect(url).await.map_err(storage_error)?;
        Ok(Self { conn, ttl: None })
    }

    /// Expire a session `ttl` after its last append.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The Redis list holding `session_id`.
    pub fn key(session_id: &str) -> String {
        format!("{HISTORY_KEY_PREFIX}{session_id}")
    }
}

#[async_trait]
impl ChatHistory for RedisChatHistory {
    async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> =
            conn.lrange(Self::key(session_id), 0, -1).await.map_err(storage_error)?;
        raw.iter().map(|json| serde_json::from_str(json).map_err(storage_error)).collect()
    }

    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let encoded = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_error)?;
        let key = Self::key(session_id);
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&key, encoded).await.map_err(storage_error)?;
        if let Some(ttl) = self.ttl {
            let seconds = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
            conn.expire::<_, ()>(&key, seconds).await.map_err(storage_error)?;
        }
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(session_id)).await.map_err(storage_error)?;
        Ok(())
    }
}
