//! The service facade behind the three knowledge operations.
//!
//! An HTTP layer maps `POST /knowledge`, `DELETE /knowledge` and
//! `POST /knowledge/retrieve` onto [`KnowledgeService::create`],
//! [`KnowledgeService::delete`] and [`KnowledgeService::retrieve`], and
//! failures onto [`KnowledgeError::status_code`](crate::KnowledgeError::status_code).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::KnowledgeConfig;
use crate::embedding::EmbedderFactory;
use crate::error::{KnowledgeError, Result};
use crate::generation::AnswerGenerator;
use crate::history::ChatHistory;
use crate::ingestion::{IngestReport, IngestionPipeline};
use crate::request::{
    CreateKnowledgeRequest, DeleteKnowledgeRequest, KnowledgeResponse, RetrieveKnowledgeRequest,
    RetrieveResponse,
};
use crate::retrieval::{Retrieval, RetrievalPipeline};
use crate::vectorstore::VectorStore;

/// Message of a successful create.
pub const CREATED_MESSAGE: &str = "Successfully created embeddings";
/// Message of a successful delete.
pub const DELETED_MESSAGE: &str = "Successfully deleted";
/// Message of a retrieve against a store without embeddings.
pub const EMPTY_STORE_MESSAGE: &str = "No embeddings found. Please create embeddings first";

/// Validates requests and drives the ingestion and retrieval pipelines.
pub struct KnowledgeService {
    config: KnowledgeConfig,
    ingestion: IngestionPipeline,
    retrieval: RetrievalPipeline,
}

impl KnowledgeService {
    /// Create a new [`KnowledgeServiceBuilder`] using `config`.
    pub fn builder(config: KnowledgeConfig) -> KnowledgeServiceBuilder {
        KnowledgeServiceBuilder {
            config,
            embedders: None,
            store: None,
            generator: None,
            history: None,
        }
    }

    /// The configuration both pipelines were built from.
    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// The ingestion pipeline.
    pub fn ingestion(&self) -> &IngestionPipeline {
        &self.ingestion
    }

    /// The retrieval pipeline.
    pub fn retrieval(&self) -> &RetrievalPipeline {
        &self.retrieval
    }

    /// Ingest an uploaded file, replacing any earlier version of the source.
    pub async fn create(&self, request: CreateKnowledgeRequest) -> Result<KnowledgeResponse> {
        self.create_with_cancellation(request, &CancellationToken::new()).await.map(|_| {
            KnowledgeResponse::new(CREATED_MESSAGE)
        })
    }

    /// Like [`create`](Self::create), returning the ingest report and
    /// stopping early when `cancel` fires before the store is written.
    #[instrument(skip_all, fields(file = %request.file.name))]
    pub async fn create_with_cancellation(
        &self,
        request: CreateKnowledgeRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let valid = request.validate(&self.config)?;
        let report =
            self.ingestion.ingest_with_cancellation(&valid.document, &valid.credential, cancel).await?;
        info!(source_id = %report.source_id, chunk_count = report.chunk_count, "created knowledge");
        Ok(report)
    }

    /// Delete every chunk of a source. Unknown sources succeed.
    #[instrument(skip_all)]
    pub async fn delete(&self, request: DeleteKnowledgeRequest) -> Result<KnowledgeResponse> {
        let source_id = request.validate()?;
        let removed = self.ingestion.delete(&source_id).await?;
        info!(%source_id, removed, "deleted knowledge");
        Ok(KnowledgeResponse::new(DELETED_MESSAGE))
    }

    /// Answer a question from stored knowledge.
    ///
    /// The message is the generated answer when a generator is configured
    /// and the assembled context otherwise. An empty store short-circuits
    /// with [`EMPTY_STORE_MESSAGE`] before any model call.
    #[instrument(skip_all, fields(user_id = ?request.user_id))]
    pub async fn retrieve(&self, request: RetrieveKnowledgeRequest) -> Result<RetrieveResponse> {
        let valid = request.validate()?;

        if self.retrieval.vector_store().count().await? == 0 {
            info!("no embeddings stored");
            return Ok(RetrieveResponse {
                message: EMPTY_STORE_MESSAGE.to_string(),
                context: String::new(),
                sources: Vec::new(),
            });
        }

        let answer = self.retrieval.answer(&valid.query, &valid.credential).await?;
        let sources = sources(&answer.retrieval);
        let Retrieval { context, .. } = answer.retrieval;
        let message = answer.answer.unwrap_or_else(|| context.clone());
        Ok(RetrieveResponse { message, context, sources })
    }
}

/// Source identifiers in rank order, first occurrence only.
fn sources(retrieval: &Retrieval) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for result in &retrieval.results {
        if !sources.contains(&result.chunk.source_id) {
            sources.push(result.chunk.source_id.clone());
        }
    }
    sources
}

/// Builder for constructing a [`KnowledgeService`].
pub struct KnowledgeServiceBuilder {
    config: KnowledgeConfig,
    embedders: Option<Arc<dyn EmbedderFactory>>,
    store: Option<Arc<dyn VectorStore>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    history: Option<Arc<dyn ChatHistory>>,
}

impl KnowledgeServiceBuilder {
    /// Set the embedder factory. Required.
    pub fn embedders(mut self, embedders: Arc<dyn EmbedderFactory>) -> Self {
        self.embedders = Some(embedders);
        self
    }

    /// Set the vector store. Required.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Answer questions with `generator` instead of returning the context.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Keep per-user chat history in `history`.
    pub fn history(mut self, history: Arc<dyn ChatHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Build both pipelines from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if a required component is
    /// missing or the store does not use the configured dimension.
    pub fn build(self) -> Result<KnowledgeService> {
        let config = self.config;
        let embedders = self
            .embedders
            .ok_or_else(|| KnowledgeError::ConfigError("embedder factory is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| KnowledgeError::ConfigError("vector_store is required".into()))?;
        if store.dimensions() != config.dimensions {
            return Err(KnowledgeError::ConfigError(format!(
                "vector store dimension {} does not match configured dimension {}",
                store.dimensions(),
                config.dimensions
            )));
        }

        let chunker = config.chunking.build(config.chunk_size, config.chunk_overlap)?;
        let ingestion = IngestionPipeline::builder()
            .chunker(chunker)
            .embedders(Arc::clone(&embedders))
            .vector_store(Arc::clone(&store))
            .batch_size(config.embedding_batch_size)
            .build()?;

        let mut retrieval = RetrievalPipeline::builder()
            .embedders(embedders)
            .vector_store(store)
            .top_k(config.top_k)
            .route_to_best_source(config.route_to_best_source)
            .system_prompt(config.system_prompt.clone());
        if let Some(turns) = config.history_turns {
            retrieval = retrieval.history_turns(turns);
        }
        if let Some(threshold) = config.similarity_threshold {
            retrieval = retrieval.similarity_threshold(threshold);
        }
        if let Some(generator) = self.generator {
            retrieval = retrieval.generator(generator);
        }
        if let Some(history) = self.history {
            retrieval = retrieval.history(history);
        }

        Ok(KnowledgeService { config, ingestion, retrieval: retrieval.build()? })
    }
}
