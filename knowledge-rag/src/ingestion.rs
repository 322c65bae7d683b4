//! Document ingestion: chunk → embed → store, and deletion by source.
//!
//! Every ingestion walks the state machine
//! `Received → Chunked → Embedded → Stored → Complete`, moving to `Failed`
//! from any non-terminal state. Nothing becomes visible to readers until the
//! vector store's atomic upsert commits, so a failure at any step leaves the
//! previous version of the document (or no document) in place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chunking::Chunker;
use crate::document::{Chunk, Document};
use crate::embedding::{ApiKey, EmbedderFactory, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::vectorstore::{VectorStore, check_embedding};

/// Default number of chunk texts sent per embedding request.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;

/// Where an ingestion currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    /// Accepted, not yet processed.
    Received,
    /// Split into chunks.
    Chunked,
    /// Every chunk carries an embedding.
    Embedded,
    /// Written to the vector store.
    Stored,
    /// Finished successfully.
    Complete,
    /// Stopped by an error or cancellation. The store was left unchanged.
    Failed,
}

impl IngestState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: IngestState) -> bool {
        use IngestState::*;
        matches!(
            (self, next),
            (Received, Chunked)
                | (Chunked, Embedded)
                | (Embedded, Stored)
                | (Stored, Complete)
                | (Received | Chunked | Embedded | Stored, Failed)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Chunked => "chunked",
            Self::Embedded => "embedded",
            Self::Stored => "stored",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the state of a single ingestion.
#[derive(Debug)]
struct Progress<'a> {
    source_id: &'a str,
    state: IngestState,
}

impl<'a> Progress<'a> {
    fn new(source_id: &'a str) -> Self {
        debug!(source_id, state = %IngestState::Received, "ingestion received");
        Self { source_id, state: IngestState::Received }
    }

    fn advance(&mut self, next: IngestState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        debug!(source_id = self.source_id, from = %self.state, to = %next, "ingestion state");
        self.state = next;
    }

    fn fail(&mut self, err: KnowledgeError) -> KnowledgeError {
        error!(source_id = self.source_id, state = %self.state, error = %err, "ingestion failed");
        if !self.state.is_terminal() {
            self.state = IngestState::Failed;
        }
        err
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The document's source identifier.
    pub source_id: String,
    /// Number of chunks now stored for the source.
    pub chunk_count: usize,
    /// Final state (always [`IngestState::Complete`]).
    pub state: IngestState,
}

/// One async lock per source identifier, created on demand.
#[derive(Debug, Default)]
pub struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceLocks {
    /// Wait for exclusive access to `source_id`.
    pub async fn acquire(&self, source_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop locks nobody holds or waits for.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(source_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Orchestrates ingestion of documents into a [`VectorStore`].
///
/// Construct one via [`IngestionPipeline::builder()`].
pub struct IngestionPipeline {
    chunker: Arc<dyn Chunker>,
    embedders: Arc<dyn EmbedderFactory>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    locks: Arc<SourceLocks>,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest `document`, replacing any chunks previously stored for its source.
    ///
    /// # Errors
    ///
    /// - [`KnowledgeError::InvalidRequest`] if the document has no text
    /// - errors from the embedder ([`KnowledgeError::AuthenticationError`],
    ///   [`KnowledgeError::ExternalServiceError`]) or the store
    ///   ([`KnowledgeError::StorageError`], [`KnowledgeError::ConfigError`])
    pub async fn ingest(&self, document: &Document, credential: &ApiKey) -> Result<IngestReport> {
        self.ingest_with_cancellation(document, credential, &CancellationToken::new()).await
    }

    /// Like [`ingest`](Self::ingest), but stops with
    /// [`KnowledgeError::Cancelled`] if `cancel` fires before the store commit.
    pub async fn ingest_with_cancellation(
        &self,
        document: &Document,
        credential: &ApiKey,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let source_id = document.source_id.as_str();
        let mut progress = Progress::new(source_id);

        if source_id.trim().is_empty() {
            return Err(progress.fail(KnowledgeError::InvalidRequest(
                "document source identifier must not be empty".into(),
            )));
        }
        if document.text.trim().is_empty() {
            return Err(progress.fail(KnowledgeError::InvalidRequest(format!(
                "document '{source_id}' has no text"
            ))));
        }

        // 1. Chunk the document
        let mut chunks = self.chunker.chunk(document);
        progress.advance(IngestState::Chunked);
        debug!(source_id, chunk_count = chunks.len(), "chunked document");

        // 2. Embed the chunks
        let embedder = self.embedders.create(credential).map_err(|e| progress.fail(e))?;
        let embeddings = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KnowledgeError::Cancelled(format!(
                "ingestion of '{source_id}' cancelled while embedding"
            ))),
            result = self.embed_chunks(embedder.as_ref(), &chunks) => result,
        }
        .map_err(|e| progress.fail(e))?;

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }
        progress.advance(IngestState::Embedded);

        // 3. Store atomically, serialised with other writers of this source
        let _guard = self.locks.acquire(source_id).await;
        if cancel.is_cancelled() {
            return Err(progress.fail(KnowledgeError::Cancelled(format!(
                "ingestion of '{source_id}' cancelled before storing"
            ))));
        }
        self.store.upsert(source_id, &chunks).await.map_err(|e| progress.fail(e))?;
        progress.advance(IngestState::Stored);

        progress.advance(IngestState::Complete);
        let chunk_count = chunks.len();
        info!(source_id, chunk_count, "ingested document");

        Ok(IngestReport { source_id: source_id.to_string(), chunk_count, state: progress.state })
    }

    /// Embed chunk texts in batches, checking count and dimension of every vector.
    async fn embed_chunks(
        &self,
        embedder: &dyn EmbeddingProvider,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>> {
        let dimensions = self.store.dimensions();
        let mut embeddings = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(KnowledgeError::external(
                    embedder.model(),
                    format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
                ));
            }
            for vector in &vectors {
                check_embedding(dimensions, vector)?;
            }
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    /// Delete every chunk of `source_id`. Unknown sources delete nothing and succeed.
    pub async fn delete(&self, source_id: &str) -> Result<u64> {
        let _guard = self.locks.acquire(source_id).await;
        let removed = self.store.delete_by_source(source_id).await?;
        info!(source_id, removed, "deleted document");
        Ok(removed)
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// The chunker, embedder factory and vector store are required.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    chunker: Option<Arc<dyn Chunker>>,
    embedders: Option<Arc<dyn EmbedderFactory>>,
    store: Option<Arc<dyn VectorStore>>,
    batch_size: Option<usize>,
    locks: Option<Arc<SourceLocks>>,
}

impl IngestionPipelineBuilder {
    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedder factory.
    pub fn embedders(mut self, embedders: Arc<dyn EmbedderFactory>) -> Self {
        self.embedders = Some(embedders);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set how many chunk texts go into one embedding request.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Share per-source locks with another pipeline writing the same store.
    pub fn source_locks(mut self, locks: Arc<SourceLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if a required component is
    /// missing, the batch size is zero, or the embedder and store disagree on
    /// the embedding dimension.
    pub fn build(self) -> Result<IngestionPipeline> {
        let chunker =
            self.chunker.ok_or_else(|| KnowledgeError::ConfigError("chunker is required".into()))?;
        let embedders = self
            .embedders
            .ok_or_else(|| KnowledgeError::ConfigError("embedder factory is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| KnowledgeError::ConfigError("vector_store is required".into()))?;
        let batch_size = self.batch_size.unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE);
        if batch_size == 0 {
            return Err(KnowledgeError::ConfigError("batch_size must be greater than zero".into()));
        }
        if embedders.dimensions() != store.dimensions() {
            return Err(KnowledgeError::ConfigError(format!(
                "embedder dimension {} does not match store dimension {}",
                embedders.dimensions(),
                store.dimensions()
            )));
        }

        Ok(IngestionPipeline {
            chunker,
            embedders,
            store,
            batch_size,
            locks: self.locks.unwrap_or_default(),
        })
    }
}
