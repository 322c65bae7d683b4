//! Question answering over stored knowledge: embed → search → assemble context
//! → optionally generate an answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::document::{SearchFilter, SearchResult};
use crate::embedding::{ApiKey, EmbedderFactory};
use crate::error::{KnowledgeError, Result};
use crate::generation::{AnswerGenerator, DEFAULT_SYSTEM_PROMPT, GenerationRequest};
use crate::history::{ChatHistory, ChatMessage};
use crate::vectorstore::VectorStore;

/// Separator placed between chunk texts in the assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Number of first-pass candidates voting for a source when routing.
pub const ROUTING_CANDIDATES: usize = 3;

/// A question to retrieve knowledge for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// The question text.
    pub question: String,
    /// Caller identity, carried through as metadata and used as the chat
    /// history session. Never used to filter search results.
    pub user_id: Option<String>,
    /// Overrides the pipeline's `top_k`.
    pub top_k: Option<usize>,
    /// Restricts which chunks may be returned.
    pub filter: Option<SearchFilter>,
}

impl RetrievalQuery {
    /// Create a query for `question` with pipeline defaults.
    pub fn new(question: impl Into<String>) -> Self {
        Self { question: question.into(), ..Self::default() }
    }

    /// Attach a caller identity.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the number of results.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Restrict the search with `filter`.
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Ranked chunks and the context assembled from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    /// The question that was searched for (after any rewriting).
    pub question: String,
    /// Pass-through caller identity.
    pub user_id: Option<String>,
    /// The source every result was restricted to when routing is enabled.
    pub routed_source: Option<String>,
    /// Results in descending score order. Empty when nothing matched.
    pub results: Vec<SearchResult>,
    /// Chunk texts in rank order, joined by [`CONTEXT_SEPARATOR`].
    pub context: String,
}

/// A retrieval plus the generated answer, if a generator is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// The generated answer, `None` without a generator.
    pub answer: Option<String>,
    /// The retrieval the answer was grounded on.
    pub retrieval: Retrieval,
}

/// Join chunk texts in rank order.
pub fn assemble_context(results: &[SearchResult]) -> String {
    results.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR)
}

/// Pick the source appearing most often among `candidates`.
///
/// Ties go to the source ranked highest.
pub fn best_source(candidates: &[SearchResult]) -> Option<&str> {
    let mut votes: Vec<(&str, usize)> = Vec::new();
    for result in candidates {
        let source = result.chunk.source_id.as_str();
        match votes.iter_mut().find(|(s, _)| *s == source) {
            Some((_, count)) => *count += 1,
            None => votes.push((source, 1)),
        }
    }
    // `max_by_key` keeps the last maximum, so scan in reverse rank order.
    votes.into_iter().rev().max_by_key(|(_, count)| *count).map(|(source, _)| source)
}

/// Keep the last `turns` user/assistant exchanges of `history`.
pub fn history_window(mut history: Vec<ChatMessage>, turns: Option<usize>) -> Vec<ChatMessage> {
    if let Some(turns) = turns {
        let keep = turns.saturating_mul(2);
        if history.len() > keep {
            history.drain(..history.len() - keep);
        }
    }
    history
}

/// The retrieval pipeline.
///
/// Construct one via [`RetrievalPipeline::builder()`].
pub struct RetrievalPipeline {
    embedders: Arc<dyn EmbedderFactory>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    similarity_threshold: Option<f32>,
    route_to_best_source: bool,
    system_prompt: String,
    generator: Option<Arc<dyn AnswerGenerator>>,
    history: Option<Arc<dyn ChatHistory>>,
    history_turns: Option<usize>,
}

impl RetrievalPipeline {
    /// Create a new [`RetrievalPipelineBuilder`].
    pub fn builder() -> RetrievalPipelineBuilder {
        RetrievalPipelineBuilder::default()
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Whether [`answer`](Self::answer) will call a generative model.
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Embed the question, search, filter by threshold and assemble context.
    ///
    /// With source routing enabled, a first search over
    /// [`ROUTING_CANDIDATES`] chunks elects one source by
    /// [`best_source`], and the results come from that source only.
    ///
    /// # Errors
    ///
    /// Returns embedder errors, and [`KnowledgeError::ConfigError`] if the
    /// embedder and store dimensions disagree.
    pub async fn retrieve(&self, query: &RetrievalQuery, credential: &ApiKey) -> Result<Retrieval> {
        let top_k = query.top_k.unwrap_or(self.top_k);
        debug!(user_id = ?query.user_id, top_k, "retrieving");

        // 1. Embed the question
        let embedder = self.embedders.create(credential)?;
        let query_embedding = embedder.embed(&query.question).await.map_err(|e| {
            error!(error = %e, "embedding failed during retrieval");
            e
        })?;

        // 2. Route to a single source
        let mut filter = query.filter.clone();
        let mut routed_source = None;
        if self.route_to_best_source {
            let candidates =
                self.store.search(&query_embedding, ROUTING_CANDIDATES, filter.as_ref()).await?;
            if let Some(source) = best_source(&candidates) {
                debug!(source, "routed question to source");
                let mut routed = filter.unwrap_or_default();
                routed.source_ids = vec![source.to_string()];
                filter = Some(routed);
                routed_source = Some(source.to_string());
            }
        }

        // 3. Search the vector store
        let results = self.store.search(&query_embedding, top_k, filter.as_ref()).await?;

        // 4. Filter by similarity threshold
        let results: Vec<SearchResult> = match self.similarity_threshold {
            Some(threshold) => results.into_iter().filter(|r| r.score >= threshold).collect(),
            None => results,
        };

        // 5. Assemble context in rank order
        let context = assemble_context(&results);
        info!(user_id = ?query.user_id, result_count = results.len(), "retrieval completed");

        Ok(Retrieval {
            question: query.question.clone(),
            user_id: query.user_id.clone(),
            routed_source,
            results,
            context,
        })
    }

    /// Retrieve and, when a generator is configured, answer the question.
    ///
    /// With a chat history and a `user_id`, earlier turns are used to rewrite
    /// the question before searching and are passed to the generator; the new
    /// exchange is appended afterwards. Only the last `history_turns`
    /// exchanges are used when a window is set. History failures are logged
    /// and skipped.
    pub async fn answer(&self, query: &RetrievalQuery, credential: &ApiKey) -> Result<Answer> {
        let Some(generator) = &self.generator else {
            let retrieval = self.retrieve(query, credential).await?;
            return Ok(Answer { answer: None, retrieval });
        };

        let session = query.user_id.as_deref().zip(self.history.as_ref());
        let history = match session {
            Some((user_id, store)) => store.messages(user_id).await.unwrap_or_else(|e| {
                warn!(user_id, error = %e, "failed to load chat history");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let history = history_window(history, self.history_turns);

        let standalone = if history.is_empty() {
            query.question.clone()
        } else {
            generator.condense_question(credential, &history, &query.question).await?
        };
        debug!(rewritten = standalone != query.question, "condensed question");

        let search_query = RetrievalQuery { question: standalone, ..query.clone() };
        let retrieval = self.retrieve(&search_query, credential).await?;

        let request = GenerationRequest {
            system_prompt: self.system_prompt.clone(),
            context: retrieval.context.clone(),
            history,
            question: query.question.clone(),
        };
        let answer = generator.generate(credential, &request).await?;

        if let Some((user_id, store)) = session {
            let turn = [ChatMessage::user(&query.question), ChatMessage::assistant(&answer)];
            if let Err(e) = store.append(user_id, &turn).await {
                warn!(user_id, error = %e, "failed to save chat history");
            }
        }

        info!(user_id = ?query.user_id, answer_len = answer.len(), "answered question");
        Ok(Answer { answer: Some(answer), retrieval })
    }
}

/// Builder for constructing a [`RetrievalPipeline`].
///
/// The embedder factory and vector store are required; the generator and
/// chat history are optional.
#[derive(Default)]
pub struct RetrievalPipelineBuilder {
    embedders: Option<Arc<dyn EmbedderFactory>>,
    store: Option<Arc<dyn VectorStore>>,
    top_k: Option<usize>,
    similarity_threshold: Option<f32>,
    route_to_best_source: bool,
    system_prompt: Option<String>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    history: Option<Arc<dyn ChatHistory>>,
    history_turns: Option<usize>,
}

impl RetrievalPipelineBuilder {
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

    /// Set the number of results to retrieve.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Drop results scoring below `threshold`.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// Answer from the single best-matching source instead of mixing sources.
    pub fn route_to_best_source(mut self, enabled: bool) -> Self {
        self.route_to_best_source = enabled;
        self
    }

    /// Set the system prompt placed before the context.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the chat history store.
    pub fn history(mut self, history: Arc<dyn ChatHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Limit the chat history passed on to the last `turns` exchanges.
    pub fn history_turns(mut self, turns: usize) -> Self {
        self.history_turns = Some(turns);
        self
    }

    /// Build the [`RetrievalPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if a required component is
    /// missing, `top_k` is zero, or the embedder and store dimensions differ.
    pub fn build(self) -> Result<RetrievalPipeline> {
        let embedders = self
            .embedders
            .ok_or_else(|| KnowledgeError::ConfigError("embedder factory is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| KnowledgeError::ConfigError("vector_store is required".into()))?;
        let top_k = self.top_k.unwrap_or(crate::config::DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(KnowledgeError::ConfigError("top_k must be greater than zero".into()));
        }
        if embedders.dimensions() != store.dimensions() {
            return Err(KnowledgeError::ConfigError(format!(
                "embedder dimension {} does not match store dimension {}",
                embedders.dimensions(),
                store.dimensions()
            )));
        }

        Ok(RetrievalPipeline {
            embedders,
            store,
            top_k,
            similarity_threshold: self.similarity_threshold,
            route_to_best_source: self.route_to_best_source,
            system_prompt: self.system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            generator: self.generator,
            history: self.history,
            history_turns: self.history_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;

    fn result(text: &str, score: f32) -> SearchResult {
        from_source("doc", text, score)
    }

    fn from_source(source_id: &str, text: &str, score: f32) -> SearchResult {
        let chunk = Chunk {
            id: Chunk::make_id(source_id, 0),
            source_id: source_id.into(),
            index: 0,
            text: text.into(),
            start: 0,
            end: text.len(),
            embedding: Vec::new(),
            metadata: Default::default(),
        };
        SearchResult { chunk, score }
    }

    #[test]
    fn context_keeps_rank_order() {
        let results = vec![result("first", 0.9), result("second", 0.5)];
        assert_eq!(assemble_context(&results), "first\n\nsecond");
        assert_eq!(assemble_context(&[]), "");
    }

    #[test]
    fn best_source_is_the_majority_then_the_top_ranked() {
        let majority = [from_source("a", "1", 0.9), from_source("b", "2", 0.8), from_source("b", "3", 0.7)];
        assert_eq!(best_source(&majority), Some("b"));

        let split = [from_source("a", "1", 0.9), from_source("b", "2", 0.8), from_source("c", "3", 0.7)];
        assert_eq!(best_source(&split), Some("a"));
        assert_eq!(best_source(&[]), None);
    }

    #[test]
    fn history_window_keeps_latest_turns() {
        let history: Vec<ChatMessage> = (0..5)
            .flat_map(|i| [ChatMessage::user(format!("q{i}")), ChatMessage::assistant(format!("a{i}"))])
            .collect();

        let window = history_window(history.clone(), Some(2));
        assert_eq!(window, &history[6..]);
        assert_eq!(window[0], ChatMessage::user("q3"));
        assert_eq!(history_window(history.clone(), None).len(), 10);
        assert!(history_window(history, Some(0)).is_empty());
    }

    #[test]
    fn query_builders_set_fields() {
        let query = RetrievalQuery::new("why?").with_user("u1").with_top_k(2);
        assert_eq!(query.question, "why?");
        assert_eq!(query.user_id.as_deref(), Some("u1"));
        assert_eq!(query.top_k, Some(2));
        assert!(query.filter.is_none());
    }
}
