//! Knowledge ingestion and retrieval over vector similarity search.
//!
//! Documents are split into overlapping chunks, embedded with an external
//! model and stored in a [`VectorStore`]. Questions are embedded, the
//! nearest chunks are retrieved and their texts assembled into a context
//! that can be handed to an [`AnswerGenerator`].
//!
//! # Features
//!
//! - `openai` — [`openai::OpenAIEmbedderFactory`] and [`openai::OpenAIAnswerGenerator`]
//! - `pgvector` — [`pgvector::PgVectorStore`] on PostgreSQL
//! - `redis` — [`redis_store::RedisEmbeddingCache`] and [`redis_store::RedisChatHistory`]
//! - `full` — all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use knowledge_rag::{KnowledgeConfig, KnowledgeService, InMemoryVectorStore};
//!
//! let config = KnowledgeConfig::from_env()?;
//! let service = KnowledgeService::builder(config.clone())
//!     .embedders(Arc::new(my_factory))
//!     .vector_store(Arc::new(InMemoryVectorStore::new(config.dimensions)))
//!     .build()?;
//! ```

pub mod cache;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod history;
pub mod ingestion;
pub mod inmemory;
pub mod request;
pub mod retrieval;
pub mod retry;
pub mod service;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "pgvector")]
pub mod pgvector;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use cache::{CachedEmbeddingProvider, EmbeddingCache, InMemoryEmbeddingCache};
pub use chunking::{Chunker, ChunkingStrategy, FixedSizeChunker, RecursiveChunker};
pub use config::{KnowledgeConfig, KnowledgeConfigBuilder};
pub use document::{Chunk, Document, SearchFilter, SearchResult};
pub use embedding::{ApiKey, EmbedderFactory, EmbeddingProvider};
pub use error::{KnowledgeError, Result};
pub use generation::{AnswerGenerator, GenerationRequest};
pub use history::{ChatHistory, ChatMessage, InMemoryChatHistory, Role};
pub use ingestion::{IngestReport, IngestState, IngestionPipeline, IngestionPipelineBuilder};
pub use inmemory::InMemoryVectorStore;
pub use request::{
    CreateKnowledgeRequest, DeleteKnowledgeRequest, KnowledgeResponse, RetrieveKnowledgeRequest,
    RetrieveResponse, UploadedFile,
};
pub use retrieval::{Answer, Retrieval, RetrievalPipeline, RetrievalPipelineBuilder, RetrievalQuery};
pub use retry::{LayeredEmbedderFactory, RetryPolicy, RetryingEmbeddingProvider};
pub use service::{KnowledgeService, KnowledgeServiceBuilder};
pub use vectorstore::{SimilarityMetric, VectorStore};
