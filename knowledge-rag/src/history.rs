//! Per-session chat history for conversational retrieval.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// Who produced a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The asking user.
    User,
    /// The generator.
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// A message from the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// A message from the generator.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Storage for conversation turns keyed by session id.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Messages of `session_id`, oldest first. Unknown sessions are empty.
    async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// Append `messages` to `session_id`.
    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()>;

    /// Forget `session_id`.
    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Chat history held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryChatHistory {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistory for InMemoryChatHistory {
    async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self.sessions.read().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
