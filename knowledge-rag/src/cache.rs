//! Optional read-through cache for embeddings.
//!
//! The cache is an optimisation only: lookups that fail are treated as
//! misses and writes that fail are logged and dropped, so a broken cache
//! never changes what the pipeline stores or returns.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};

/// A key-value store for embedding vectors.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Look up a cached vector.
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>>;

    /// Store a vector under `key`.
    async fn put(&self, key: &str, embedding: &[f32]) -> Result<()>;
}

/// Cache key for `text` embedded by `model`.
pub fn cache_key(model: &str, text: &str) -> String {
    format!("knowledge:embedding:{model}:{:x}", Sha256::digest(text.as_bytes()))
}

/// A bounded least-recently-used cache held in process memory.
pub struct InMemoryEmbeddingCache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
}

impl InMemoryEmbeddingCache {
    /// Create a cache holding at most `capacity` vectors.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            KnowledgeError::ConfigError("embedding cache capacity must be non-zero".to_string())
        })?;
        Ok(Self { entries: Mutex::new(LruCache::new(capacity)) })
    }

    /// Number of cached vectors.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EmbeddingCache for InMemoryEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, embedding: &[f32]) -> Result<()> {
        self.entries.lock().await.put(key.to_string(), embedding.to_vec());
        Ok(())
    }
}

/// An [`EmbeddingProvider`] that consults an [`EmbeddingCache`] before
/// calling the inner provider, and fills the cache with what it computes.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn EmbeddingCache>,
}

impl CachedEmbeddingProvider {
    /// Put `cache` in front of `inner`.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.cache.get(key).await {
            Ok(Some(hit)) if hit.len() == self.inner.dimensions() => Some(hit),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "embedding cache lookup failed, bypassing cache");
                None
            }
        }
    }

    async fn store(&self, key: &str, embedding: &[f32]) {
        if let Err(e) = self.cache.put(key, embedding).await {
            warn!(error = %e, "embedding cache write failed");
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = cache_key(self.inner.model(), text);
        if let Some(hit) = self.lookup(&key).await {
            debug!("embedding cache hit");
            return Ok(hit);
        }
        let embedding = self.inner.embed(text).await?;
        self.store(&key, &embedding).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| cache_key(self.inner.model(), t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for key in &keys {
            results.push(self.lookup(key).await);
        }

        let missing: Vec<usize> =
            results.iter().enumerate().filter(|(_, r)| r.is_none()).map(|(i, _)| i).collect();
        debug!(batch_size = texts.len(), misses = missing.len(), "embedding cache batch lookup");

        if !missing.is_empty() {
            let miss_texts: Vec<&str> = missing.iter().map(|&i| texts[i]).collect();
            let computed = self.inner.embed_batch(&miss_texts).await?;
            if computed.len() != missing.len() {
                return Err(KnowledgeError::external(
                    self.inner.model(),
                    format!("expected {} embeddings, got {}", missing.len(), computed.len()),
                ));
            }
            for (i, embedding) in missing.into_iter().zip(computed) {
                self.store(&keys[i], &embedding).await;
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingProvider {
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl EmbeddingCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<f32>>> {
            Err(KnowledgeError::CacheError { backend: "broken".into(), message: "down".into() })
        }

        async fn put(&self, _key: &str, _embedding: &[f32]) -> Result<()> {
            Err(KnowledgeError::CacheError { backend: "broken".into(), message: "down".into() })
        }
    }

    fn counting() -> Arc<CountingProvider> {
        Arc::new(CountingProvider { calls: AtomicUsize::new(0), texts_embedded: AtomicUsize::new(0) })
    }

    #[tokio::test]
    async fn batch_only_embeds_misses_and_keeps_order() {
        let inner = counting();
        let cache = Arc::new(InMemoryEmbeddingCache::new(16).unwrap());
        let provider = CachedEmbeddingProvider::new(inner.clone(), cache.clone());

        provider.embed("bb").await.unwrap();
        let out = provider.embed_batch(&["a", "bb", "ccc"]).await.unwrap();

        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(inner.texts_embedded.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len().await, 3);

        provider.embed_batch(&["a", "ccc"]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_cache_is_bypassed() {
        let inner = counting();
        let provider = CachedEmbeddingProvider::new(inner.clone(), Arc::new(BrokenCache));

        let out = provider.embed_batch(&["x", "yy"]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(provider.embed("x").await.unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn keys_are_namespaced_by_model() {
        assert_ne!(cache_key("small", "text"), cache_key("large", "text"));
        assert_eq!(cache_key("small", "text"), cache_key("small", "text"));
        assert!(InMemoryEmbeddingCache::new(0).is_err());
    }
}
