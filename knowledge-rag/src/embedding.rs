//! Embedding provider traits for generating vector embeddings from text.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{KnowledgeError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use knowledge_rag::EmbeddingProvider;
///
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Name of the model behind this provider, used to namespace cached vectors.
    fn model(&self) -> &str {
        "default"
    }
}

/// A credential for an external model provider.
///
/// The secret is never printed by `Debug` or `Display`.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Wrap a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::AuthenticationError`] if the key is blank.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(KnowledgeError::AuthenticationError {
                provider: "credential".into(),
                message: "API key must not be empty".into(),
            });
        }
        Ok(Self(SecretString::from(key)))
    }

    /// Expose the raw key for use in a request header.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Builds an [`EmbeddingProvider`] bound to a caller's credential.
///
/// Requests carry their own provider key, so providers are created per call
/// while expensive resources (HTTP connection pools) live in the factory.
pub trait EmbedderFactory: Send + Sync {
    /// Create a provider that authenticates with `credential`.
    fn create(&self, credential: &ApiKey) -> Result<Arc<dyn EmbeddingProvider>>;

    /// The dimensionality of every provider this factory creates.
    fn dimensions(&self) -> usize;
}
