//! Bounded retry with exponential backoff for calls to external providers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::embedding::{ApiKey, EmbedderFactory, EmbeddingProvider};
use crate::error::Result;

/// How transient provider failures are retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_interval: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    pub max_interval: Duration,
    /// Growth factor applied to the delay after every retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            // The attempt count bounds retrying, not wall-clock time.
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// Errors for which [`KnowledgeError::is_transient`](crate::KnowledgeError::is_transient) is false are returned
/// immediately. After `policy.max_retries` retries the last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(operation = label, attempt, "calling external provider");

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt > policy.max_retries {
                    error!(operation = label, attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            operation = label,
                            attempt,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "transient provider failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(operation = label, error = %e, "backoff exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// An [`EmbeddingProvider`] that retries transient failures of an inner provider.
pub struct RetryingEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl RetryingEmbeddingProvider {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry(&self.policy, "embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        with_retry(&self.policy, "embed_batch", || self.inner.embed_batch(texts)).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Wraps every provider produced by an inner factory with
/// [`RetryingEmbeddingProvider`] and, when configured, a cache.
pub struct LayeredEmbedderFactory {
    inner: Arc<dyn EmbedderFactory>,
    policy: RetryPolicy,
    cache: Option<Arc<dyn crate::cache::EmbeddingCache>>,
}

impl LayeredEmbedderFactory {
    /// Wrap `inner` with retrying only.
    pub fn new(inner: Arc<dyn EmbedderFactory>, policy: RetryPolicy) -> Self {
        Self { inner, policy, cache: None }
    }

    /// Add a read-through embedding cache in front of the retrying provider.
    pub fn with_cache(mut self, cache: Arc<dyn crate::cache::EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl EmbedderFactory for LayeredEmbedderFactory {
    fn create(&self, credential: &ApiKey) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = self.inner.create(credential)?;
        let retrying: Arc<dyn EmbeddingProvider> =
            Arc::new(RetryingEmbeddingProvider::new(provider, self.policy.clone()));
        Ok(match &self.cache {
            Some(cache) => {
                Arc::new(crate::cache::CachedEmbeddingProvider::new(retrying, cache.clone()))
            }
            None => retrying,
        })
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
