//! Configuration for ingestion and retrieval.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::error::{KnowledgeError, Result};
use crate::generation::DEFAULT_SYSTEM_PROMPT;
use crate::retry::RetryPolicy;
use crate::vectorstore::SimilarityMetric;

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 4;
/// Dimension of `text-embedding-3-small` vectors.
pub const DEFAULT_DIMENSIONS: usize = 1536;
/// Default number of earlier exchanges passed to the answer generator.
pub const DEFAULT_HISTORY_TURNS: usize = 10;

/// Prefix of the environment variables read by [`KnowledgeConfig::from_env`].
pub const ENV_PREFIX: &str = "KNOWLEDGE_";

/// Configuration parameters shared by the ingestion and retrieval pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// How documents are split.
    pub chunking: ChunkingStrategy,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Results scoring below this are dropped. `None` keeps everything.
    pub similarity_threshold: Option<f32>,
    /// Answer from the single best-matching source only.
    pub route_to_best_source: bool,
    /// Earlier exchanges passed to the answer generator. `None` passes all.
    pub history_turns: Option<usize>,
    /// Embedding vector dimension.
    pub dimensions: usize,
    /// Similarity metric used by the vector store.
    pub metric: SimilarityMetric,
    /// Maximum number of texts per embedding request.
    pub embedding_batch_size: usize,
    /// Accepted upload file extensions, lowercase, without the dot.
    pub allowed_extensions: Vec<String>,
    /// Instructions placed before the retrieved context.
    pub system_prompt: String,
    /// Retry policy for model calls.
    pub retry: RetryPolicy,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            chunking: ChunkingStrategy::default(),
            top_k: DEFAULT_TOP_K,
            similarity_threshold: None,
            route_to_best_source: false,
            history_turns: Some(DEFAULT_HISTORY_TURNS),
            dimensions: DEFAULT_DIMENSIONS,
            metric: SimilarityMetric::default(),
            embedding_batch_size: crate::ingestion::DEFAULT_EMBEDDING_BATCH_SIZE,
            allowed_extensions: vec!["txt".to_string(), "md".to_string()],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Create a new builder for constructing a [`KnowledgeConfig`].
    pub fn builder() -> KnowledgeConfigBuilder {
        KnowledgeConfigBuilder::default()
    }

    /// Read overrides from `KNOWLEDGE_*` environment variables.
    ///
    /// See [`from_lookup`](Self::from_lookup) for the variable names.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overridden by `lookup`.
    ///
    /// Recognised keys: `KNOWLEDGE_CHUNK_SIZE`, `KNOWLEDGE_CHUNK_OVERLAP`,
    /// `KNOWLEDGE_CHUNKING`, `KNOWLEDGE_TOP_K`,
    /// `KNOWLEDGE_SIMILARITY_THRESHOLD`, `KNOWLEDGE_ROUTE_TO_BEST_SOURCE`,
    /// `KNOWLEDGE_HISTORY_TURNS`, `KNOWLEDGE_DIMENSIONS`,
    /// `KNOWLEDGE_METRIC`, `KNOWLEDGE_EMBEDDING_BATCH_SIZE`,
    /// `KNOWLEDGE_ALLOWED_EXTENSIONS` (comma separated),
    /// `KNOWLEDGE_SYSTEM_PROMPT`, `KNOWLEDGE_MAX_RETRIES`.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] for unparsable values or an
    /// inconsistent result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        let mut builder = Self::builder();
        if let Some(v) = var("CHUNK_SIZE") {
            builder = builder.chunk_size(parse("CHUNK_SIZE", &v)?);
        }
        if let Some(v) = var("CHUNK_OVERLAP") {
            builder = builder.chunk_overlap(parse("CHUNK_OVERLAP", &v)?);
        }
        if let Some(v) = var("CHUNKING") {
            builder = builder.chunking(v.parse()?);
        }
        if let Some(v) = var("TOP_K") {
            builder = builder.top_k(parse("TOP_K", &v)?);
        }
        if let Some(v) = var("SIMILARITY_THRESHOLD") {
            builder = builder.similarity_threshold(parse("SIMILARITY_THRESHOLD", &v)?);
        }
        if let Some(v) = var("ROUTE_TO_BEST_SOURCE") {
            builder = builder.route_to_best_source(parse("ROUTE_TO_BEST_SOURCE", &v)?);
        }
        if let Some(v) = var("HISTORY_TURNS") {
            builder = builder.history_turns(Some(parse("HISTORY_TURNS", &v)?));
        }
        if let Some(v) = var("DIMENSIONS") {
            builder = builder.dimensions(parse("DIMENSIONS", &v)?);
        }
        if let Some(v) = var("METRIC") {
            builder = builder.metric(v.parse()?);
        }
        if let Some(v) = var("EMBEDDING_BATCH_SIZE") {
            builder = builder.embedding_batch_size(parse("EMBEDDING_BATCH_SIZE", &v)?);
        }
        if let Some(v) = var("ALLOWED_EXTENSIONS") {
            builder = builder.allowed_extensions(v.split(','));
        }
        if let Some(v) = var("SYSTEM_PROMPT") {
            builder = builder.system_prompt(v);
        }
        if let Some(v) = var("MAX_RETRIES") {
            builder = builder.max_retries(parse("MAX_RETRIES", &v)?);
        }
        builder.build()
    }

    /// Whether `file_name` has one of the allowed extensions.
    pub fn allows_file(&self, file_name: &str) -> bool {
        file_extension(file_name)
            .is_some_and(|ext| self.allowed_extensions.iter().any(|allowed| *allowed == ext))
    }
}

/// Lowercased extension of `file_name`, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        KnowledgeError::ConfigError(format!("{ENV_PREFIX}{name}: invalid value '{value}'"))
    })
}

/// Builder for constructing a validated [`KnowledgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct KnowledgeConfigBuilder {
    config: KnowledgeConfig,
}

impl KnowledgeConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Answer from the single best-matching source only.
    pub fn route_to_best_source(mut self, enabled: bool) -> Self {
        self.config.route_to_best_source = enabled;
        self
    }

    /// Set how many earlier exchanges reach the answer generator.
    pub fn history_turns(mut self, turns: Option<usize>) -> Self {
        self.config.history_turns = turns;
        self
    }

    /// Set the embedding vector dimension.
    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.config.dimensions = dimensions;
        self
    }

    /// Set the similarity metric.
    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Set the maximum number of texts per embedding request.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Replace the accepted upload extensions. Leading dots and case are
    /// ignored.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Set the instructions placed before the retrieved context.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Set the retry policy for model calls.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set only the retry count of the retry policy.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    /// Build the [`KnowledgeConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `dimensions == 0`
    /// - `embedding_batch_size == 0`
    /// - no extensions are allowed
    pub fn build(self) -> Result<KnowledgeConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(KnowledgeError::ConfigError("chunk_size must be greater than zero".into()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(KnowledgeError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(KnowledgeError::ConfigError("top_k must be greater than zero".into()));
        }
        if config.dimensions == 0 {
            return Err(KnowledgeError::ConfigError("dimensions must be greater than zero".into()));
        }
        if config.embedding_batch_size == 0 {
            return Err(KnowledgeError::ConfigError(
                "embedding_batch_size must be greater than zero".into(),
            ));
        }
        if config.allowed_extensions.is_empty() {
            return Err(KnowledgeError::ConfigError(
                "at least one file extension must be allowed".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = KnowledgeConfig::builder().build().unwrap();
        assert_eq!(config, KnowledgeConfig::default());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.chunking, ChunkingStrategy::Recursive);
        assert!(config.similarity_threshold.is_none());
        assert!(!config.route_to_best_source);
        assert_eq!(config.history_turns, Some(DEFAULT_HISTORY_TURNS));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = KnowledgeConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, KnowledgeError::ConfigError(_)));
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(KnowledgeConfig::builder().top_k(0).build().is_err());
        assert!(KnowledgeConfig::builder().dimensions(0).build().is_err());
        assert!(KnowledgeConfig::builder().embedding_batch_size(0).build().is_err());
        assert!(KnowledgeConfig::builder().allowed_extensions(Vec::<String>::new()).build().is_err());
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = KnowledgeConfig::from_lookup(lookup(&[
            ("KNOWLEDGE_CHUNK_SIZE", "200"),
            ("KNOWLEDGE_CHUNK_OVERLAP", "50"),
            ("KNOWLEDGE_CHUNKING", "fixed"),
            ("KNOWLEDGE_TOP_K", " 3 "),
            ("KNOWLEDGE_SIMILARITY_THRESHOLD", "0.25"),
            ("KNOWLEDGE_METRIC", "inner_product"),
            ("KNOWLEDGE_ALLOWED_EXTENSIONS", "txt, .MD ,csv"),
            ("KNOWLEDGE_MAX_RETRIES", "0"),
            ("KNOWLEDGE_ROUTE_TO_BEST_SOURCE", "true"),
            ("KNOWLEDGE_HISTORY_TURNS", "2"),
            ("CHUNK_SIZE", "9"),
        ]))
        .unwrap();

        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.chunking, ChunkingStrategy::Fixed);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.similarity_threshold, Some(0.25));
        assert_eq!(config.metric, SimilarityMetric::InnerProduct);
        assert_eq!(config.allowed_extensions, vec!["txt", "md", "csv"]);
        assert_eq!(config.retry.max_retries, 0);
        assert!(config.route_to_best_source);
        assert_eq!(config.history_turns, Some(2));
    }

    #[test]
    fn blank_variables_are_ignored() {
        let config = KnowledgeConfig::from_lookup(lookup(&[("KNOWLEDGE_TOP_K", "  ")])).unwrap();
        assert_eq!(config.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn unparsable_variable_names_the_key() {
        let err = KnowledgeConfig::from_lookup(lookup(&[("KNOWLEDGE_TOP_K", "many")])).unwrap_err();
        assert!(err.to_string().contains("KNOWLEDGE_TOP_K"));
    }

    #[test]
    fn file_extensions_are_case_insensitive() {
        let config = KnowledgeConfig::default();
        assert!(config.allows_file("notes.txt"));
        assert!(config.allows_file("README.MD"));
        assert!(!config.allows_file("report.pdf"));
        assert!(!config.allows_file("txt"));
        assert!(!config.allows_file(".txt"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: KnowledgeConfig = serde_json::from_str(r#"{"top_k": 7}"#).unwrap();
        assert_eq!(config.top_k, 7);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
