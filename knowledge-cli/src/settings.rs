//! Resolved runtime settings: CLI flags over environment over defaults.

use anyhow::{Context, Result};
use knowledge_rag::KnowledgeConfig;
use knowledge_rag::openai::OpenAIConfig;
use knowledge_rag::pgvector::{IndexKind, PgVectorConfig};

use crate::cli::Cli;

#[derive(Clone)]
pub struct Settings {
    pub knowledge: KnowledgeConfig,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai: OpenAIConfig,
    pub table: String,
}

impl Settings {
    /// Resolve settings from parsed arguments and `KNOWLEDGE_*` variables.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let knowledge = KnowledgeConfig::from_env().context("invalid KNOWLEDGE_* configuration")?;
        Self::from_parts(cli, knowledge)
    }

    pub fn from_parts(cli: &Cli, knowledge: KnowledgeConfig) -> Result<Self> {
        let database_url = cli
            .database_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .context("DATABASE_URL is not set (use --database-url or the environment)")?;

        let mut openai = OpenAIConfig::default();
        if let Some(base_url) = &cli.openai_base_url {
            openai = openai.with_base_url(base_url);
        }
        if let Some(model) = &cli.embedding_model {
            openai = openai.with_embedding_model(model, knowledge.dimensions);
        }
        if let Some(model) = &cli.chat_model {
            openai = openai.with_chat_model(model);
        }
        if openai.dimensions != knowledge.dimensions {
            openai = openai.with_dimensions(knowledge.dimensions);
        }

        Ok(Self {
            knowledge,
            database_url,
            redis_url: cli.redis_url.clone().filter(|url| !url.trim().is_empty()),
            openai_api_key: cli.openai_api_key.clone(),
            openai,
            table: cli.table.clone(),
        })
    }

    pub fn store_config(&self, hnsw: bool) -> PgVectorConfig {
        let mut config = PgVectorConfig::new(self.knowledge.dimensions);
        config.metric = self.knowledge.metric;
        config.table = self.table.clone();
        config.index = if hnsw { IndexKind::Hnsw } else { IndexKind::Exact };
        config
    }

    /// The API key, required by every command that calls a model.
    pub fn api_key(&self) -> Result<String> {
        self.openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("OPENAI_API_KEY is not set (use --openai-api-key or the environment)")
    }
}
