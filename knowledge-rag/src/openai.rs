//! OpenAI embedding and chat providers over the REST API.
//!
//! This module is only available when the `openai` feature is enabled. Any
//! OpenAI-compatible endpoint works by overriding `base_url`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{ApiKey, EmbedderFactory, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::generation::{AnswerGenerator, CONTEXTUALIZE_QUESTION_PROMPT, GenerationRequest};
use crate::history::{ChatMessage, Role};
use crate::retry::{RetryPolicy, with_retry};

const PROVIDER: &str = "OpenAI";

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// The default chat model used for answers.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Connection settings shared by the embedding and chat clients.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAIConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Dimensionality of the embedding model's vectors.
    pub dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    pub request_dimensions: Option<usize>,
    /// Chat model name.
    pub chat_model: String,
    /// Sampling temperature for answers.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl OpenAIConfig {
    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the embedding model (e.g. `text-embedding-3-large`) and its dimension.
    pub fn with_embedding_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.embedding_model = model.into();
        self.dimensions = dimensions;
        self
    }

    /// Request truncated embeddings of `dims` (Matryoshka support).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Set the chat model.
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder().timeout(self.timeout).build().map_err(|e| {
            KnowledgeError::ConfigError(format!("failed to build HTTP client: {e}"))
        })
    }
}

// ── error mapping ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(status: StatusCode, detail: &str) -> KnowledgeError {
    let message = format!("API returned {status}: {detail}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            KnowledgeError::AuthenticationError { provider: PROVIDER.into(), message }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            KnowledgeError::transient(PROVIDER, message)
        }
        s if s.is_server_error() => KnowledgeError::transient(PROVIDER, message),
        _ => KnowledgeError::external(PROVIDER, message),
    }
}

fn map_transport(e: reqwest::Error) -> KnowledgeError {
    error!(provider = PROVIDER, error = %e, "request failed");
    if e.is_timeout() || e.is_connect() || e.is_request() {
        KnowledgeError::transient(PROVIDER, format!("request failed: {e}"))
    } else {
        KnowledgeError::external(PROVIDER, format!("request failed: {e}"))
    }
}

async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    url: &str,
    credential: &ApiKey,
    body: &B,
) -> Result<R> {
    let response = client
        .post(url)
        .bearer_auth(credential.expose())
        .json(body)
        .send()
        .await
        .map_err(map_transport)?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
        error!(provider = PROVIDER, %status, "API error");
        return Err(classify_status(status, &detail));
    }

    response.json::<R>().await.map_err(|e| {
        error!(provider = PROVIDER, error = %e, "failed to parse response");
        KnowledgeError::external(PROVIDER, format!("failed to parse response: {e}"))
    })
}

// ── embeddings ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Uses `reqwest` to call the `/embeddings` endpoint directly. Build one per
/// caller credential through [`OpenAIEmbedderFactory`].
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    credential: ApiKey,
    config: Arc<OpenAIConfig>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::external(PROVIDER, "API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.config.embedding_model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts.to_vec(),
            dimensions: self.config.request_dimensions,
        };
        let url = format!("{}/embeddings", self.config.base_url);

        let response: EmbeddingResponse =
            post_json(&self.client, &url, &self.credential, &request_body).await?;

        if response.data.len() != texts.len() {
            return Err(KnowledgeError::external(
                PROVIDER,
                format!("expected {} embeddings, got {}", texts.len(), response.data.len()),
            ));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.embedding_model
    }
}

/// Creates [`OpenAIEmbeddingProvider`]s sharing one connection pool.
pub struct OpenAIEmbedderFactory {
    client: reqwest::Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIEmbedderFactory {
    /// Create a factory for `config`.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        Ok(Self { client: config.client()?, config: Arc::new(config) })
    }
}

impl EmbedderFactory for OpenAIEmbedderFactory {
    fn create(&self, credential: &ApiKey) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(OpenAIEmbeddingProvider {
            client: self.client.clone(),
            credential: credential.clone(),
            config: self.config.clone(),
        }))
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

// ── chat ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// An [`AnswerGenerator`] backed by the OpenAI chat completions API.
pub struct OpenAIAnswerGenerator {
    client: reqwest::Client,
    config: Arc<OpenAIConfig>,
    policy: RetryPolicy,
}

impl OpenAIAnswerGenerator {
    /// Create a generator for `config`, retrying transient failures with `policy`.
    pub fn new(config: OpenAIConfig, policy: RetryPolicy) -> Result<Self> {
        Ok(Self { client: config.client()?, config: Arc::new(config), policy })
    }

    async fn complete(&self, credential: &ApiKey, messages: Vec<WireMessage<'_>>) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.chat_model,
            messages,
            temperature: self.config.temperature,
        };
        let url = format!("{}/chat/completions", self.config.base_url);

        let response: ChatResponse = with_retry(&self.policy, "chat_completion", || {
            post_json(&self.client, &url, credential, &body)
        })
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| KnowledgeError::external(PROVIDER, "API returned no completion"))
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIAnswerGenerator {
    async fn generate(&self, credential: &ApiKey, request: &GenerationRequest) -> Result<String> {
        let system = format!("{}{}", request.system_prompt, request.context);
        let mut messages = vec![WireMessage { role: "system", content: &system }];
        messages.extend(
            request.history.iter().map(|m| WireMessage { role: wire_role(m.role), content: &m.content }),
        );
        messages.push(WireMessage { role: "user", content: &request.question });

        debug!(
            provider = PROVIDER,
            model = %self.config.chat_model,
            history_len = request.history.len(),
            context_len = request.context.len(),
            "generating answer"
        );
        self.complete(credential, messages).await
    }

    async fn condense_question(
        &self,
        credential: &ApiKey,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }
        let mut messages = vec![WireMessage { role: "system", content: CONTEXTUALIZE_QUESTION_PROMPT }];
        messages.extend(history.iter().map(|m| WireMessage { role: wire_role(m.role), content: &m.content }));
        messages.push(WireMessage { role: "user", content: question });

        self.complete(credential, messages).await
    }
}
