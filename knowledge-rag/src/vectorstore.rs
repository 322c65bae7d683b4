//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, SearchFilter, SearchResult};
use crate::error::{KnowledgeError, Result};

/// How query vectors are compared with stored vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity, in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw dot product, unbounded.
    InnerProduct,
}

impl SimilarityMetric {
    /// Score `a` against `b`. Higher is more similar.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        match self {
            Self::InnerProduct => dot,
            Self::Cosine => {
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
        }
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "inner_product" | "inner-product" | "dot" => Ok(Self::InnerProduct),
            other => Err(KnowledgeError::ConfigError(format!("unknown similarity metric '{other}'"))),
        }
    }
}

/// A storage backend for chunk embeddings with similarity search.
///
/// Chunks are grouped by source identifier. Writes replace a source's chunks
/// as a unit, so readers observe either the previous version of a document,
/// the new one, or nothing, never a mixture.
///
/// # Example
///
/// ```rust,ignore
/// use knowledge_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new(384);
/// store.upsert("https://example.com/a.txt", &chunks).await?;
/// let results = store.search(&query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The embedding dimension every stored and queried vector must have.
    fn dimensions(&self) -> usize;

    /// The metric used to rank search results.
    fn metric(&self) -> SimilarityMetric;

    /// Atomically replace every chunk stored for `source_id` with `chunks`.
    ///
    /// Each chunk must belong to `source_id` and carry an embedding of
    /// [`dimensions()`](VectorStore::dimensions). On error the previous
    /// chunks for the source remain untouched.
    async fn upsert(&self, source_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Delete every chunk stored for `source_id`, returning how many were removed.
    ///
    /// Deleting an unknown source succeeds and returns zero.
    async fn delete_by_source(&self, source_id: &str) -> Result<u64>;

    /// Search for the `top_k` most similar chunks to `embedding`.
    ///
    /// Returns results ordered by descending score; equal scores keep
    /// insertion order.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Return the stored chunks of `source_id` in document order.
    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>>;

    /// Total number of stored chunks across all sources.
    async fn count(&self) -> Result<usize>;
}

/// Check that `embedding` has the store's dimension.
pub fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        return Err(KnowledgeError::ConfigError(format!(
            "embedding dimension {} does not match store dimension {expected}",
            embedding.len()
        )));
    }
    Ok(())
}

/// Check that `embedding` has the store's dimension and only finite components.
pub fn check_embedding(expected: usize, embedding: &[f32]) -> Result<()> {
    check_dimensions(expected, embedding)?;
    if let Some(position) = embedding.iter().position(|x| !x.is_finite()) {
        return Err(KnowledgeError::InvalidRequest(format!(
            "embedding component {position} is not finite ({})",
            embedding[position]
        )));
    }
    Ok(())
}

/// Validate a batch of chunks before any of it is written.
pub fn validate_upsert(expected: usize, source_id: &str, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
        if chunk.source_id != source_id {
            return Err(KnowledgeError::ConfigError(format!(
                "chunk '{}' belongs to '{}', not '{source_id}'",
                chunk.id, chunk.source_id
            )));
        }
        check_embedding(expected, &chunk.embedding)?;
    }
    Ok(())
}
