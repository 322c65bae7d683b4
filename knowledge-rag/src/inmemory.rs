//! In-memory vector store with exact search.
//!
//! This module provides [`InMemoryVectorStore`], a zero-dependency vector store
//! backed by a `HashMap` protected by a `tokio::sync::RwLock`. It is suitable
//! for development, testing, and small-scale use cases.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Chunk, SearchFilter, SearchResult};
use crate::error::Result;
use crate::vectorstore::{SimilarityMetric, VectorStore, check_embedding, validate_upsert};

/// A stored chunk with its global insertion sequence number.
#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    chunk: Chunk,
}

#[derive(Debug, Default)]
struct State {
    sources: HashMap<String, Vec<Entry>>,
    next_seq: u64,
}

/// An in-memory vector store scanning every vector on search.
///
/// Chunks are grouped by source: source id → chunks in document order.
/// Every write takes the single write lock, so a source replacement is
/// observed all at once.
///
/// # Example
///
/// ```rust,ignore
/// use knowledge_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new(384);
/// ```
#[derive(Debug)]
pub struct InMemoryVectorStore {
    dimensions: usize,
    metric: SimilarityMetric,
    state: RwLock<State>,
}

impl InMemoryVectorStore {
    /// Create a new empty store for vectors of `dimensions` using cosine similarity.
    pub fn new(dimensions: usize) -> Self {
        Self::with_metric(dimensions, SimilarityMetric::Cosine)
    }

    /// Create a new empty store with an explicit metric.
    pub fn with_metric(dimensions: usize, metric: SimilarityMetric) -> Self {
        Self { dimensions, metric, state: RwLock::new(State::default()) }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    async fn upsert(&self, source_id: &str, chunks: &[Chunk]) -> Result<()> {
        validate_upsert(self.dimensions, source_id, chunks)?;

        let mut state = self.state.write().await;
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            entries.push(Entry { seq: state.next_seq, chunk: chunk.clone() });
            state.next_seq += 1;
        }
        entries.sort_by_key(|e| e.chunk.index);

        let replaced = if entries.is_empty() {
            state.sources.remove(source_id)
        } else {
            state.sources.insert(source_id.to_string(), entries)
        };
        debug!(
            source_id,
            count = chunks.len(),
            replaced = replaced.map(|r| r.len()).unwrap_or(0),
            "upserted chunks in memory"
        );
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.sources.remove(source_id).map(|e| e.len() as u64).unwrap_or(0);
        debug!(source_id, removed, "deleted source from memory");
        Ok(removed)
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        check_embedding(self.dimensions, embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut scored: Vec<(u64, SearchResult)> = state
            .sources
            .values()
            .flatten()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.chunk)))
            .map(|entry| {
                let score = self.metric.score(&entry.chunk.embedding, embedding);
                (entry.seq, SearchResult { chunk: entry.chunk.clone(), score })
            })
            .collect();

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score.total_cmp(&a.score).then(seq_a.cmp(seq_b))
        });
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        Ok(state
            .sources
            .get(source_id)
            .map(|entries| entries.iter().map(|e| e.chunk.clone()).collect())
            .unwrap_or_default())
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.sources.values().map(Vec::len).sum())
    }
}
