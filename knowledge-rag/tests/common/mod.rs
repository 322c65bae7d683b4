//! Deterministic test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use knowledge_rag::{ApiKey, EmbedderFactory, EmbeddingProvider, KnowledgeError, Result};

/// Words the keyword embedder knows about. One dimension per word.
pub const VOCABULARY: [&str; 8] =
    ["lorem", "ipsum", "zebra", "giraffe", "rust", "python", "ocean", "mountain"];

pub const DIMENSIONS: usize = VOCABULARY.len();

/// A key the test factory rejects as unauthorised.
pub const REVOKED_KEY: &str = "sk-revoked";

pub fn key() -> ApiKey {
    ApiKey::new("sk-test").unwrap()
}

/// Term-count vector of `text` over [`VOCABULARY`].
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSIONS];
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if let Some(i) = VOCABULARY.iter().position(|v| *v == word) {
            vector[i] += 1.0;
        }
    }
    vector
}

/// Embeds text as keyword counts; can be switched to fail every call.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(KnowledgeError::external("keyword", "embedding service unavailable"));
        }
        Ok(keyword_vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model(&self) -> &str {
        "keyword"
    }
}

/// Hands out one shared [`KeywordEmbedder`] for every accepted credential.
#[derive(Debug, Default, Clone)]
pub struct KeywordEmbedders {
    pub embedder: Arc<KeywordEmbedder>,
}

impl KeywordEmbedders {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbedderFactory for KeywordEmbedders {
    fn create(&self, credential: &ApiKey) -> Result<Arc<dyn EmbeddingProvider>> {
        if credential.expose() == REVOKED_KEY {
            return Err(KnowledgeError::AuthenticationError {
                provider: "keyword".into(),
                message: "invalid api key".into(),
            });
        }
        Ok(self.embedder.clone())
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}
