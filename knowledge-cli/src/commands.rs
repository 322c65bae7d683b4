//! Command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use knowledge_rag::openai::{OpenAIAnswerGenerator, OpenAIEmbedderFactory};
use knowledge_rag::pgvector::PgVectorStore;
use knowledge_rag::redis_store::{RedisChatHistory, RedisEmbeddingCache};
use knowledge_rag::{
    CreateKnowledgeRequest, DeleteKnowledgeRequest, KnowledgeService, LayeredEmbedderFactory,
    RetrieveKnowledgeRequest, UploadedFile,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::settings::Settings;

pub async fn run(command: Commands, mut settings: Settings) -> Result<()> {
    match command {
        Commands::InitSchema { hnsw } => {
            let store = connect_store(&settings, hnsw).await?;
            store.ensure_schema().await?;
            print(&json!({ "message": format!("Schema ready in table '{}'", settings.table) }))
        }
        Commands::Ingest { path, url } => {
            let request = CreateKnowledgeRequest {
                openai_api_key: settings.api_key()?,
                file: read_upload(&path).await?,
                url,
            };
            let service = build_service(&settings, false).await?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling ingestion");
                    on_interrupt.cancel();
                }
            });

            let report = service.create_with_cancellation(request, &cancel).await?;
            print(&json!({
                "message": knowledge_rag::service::CREATED_MESSAGE,
                "source_id": report.source_id,
                "chunk_count": report.chunk_count,
            }))
        }
        Commands::Delete { url } => {
            let request = DeleteKnowledgeRequest { url, openai_api_key: settings.openai_api_key.clone() };
            let service = build_service(&settings, false).await?;
            print(&service.delete(request).await?)
        }
        Commands::Retrieve { question, user_id, top_k, answer, single_source } => {
            if let Some(top_k) = top_k {
                settings.knowledge.top_k = top_k;
            }
            if single_source {
                settings.knowledge.route_to_best_source = true;
            }
            let request =
                RetrieveKnowledgeRequest { openai_api_key: settings.api_key()?, question, user_id };
            let service = build_service(&settings, answer).await?;
            print(&service.retrieve(request).await?)
        }
    }
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let content =
        tokio::fs::read(path).await.with_context(|| format!("failed to read {}", path.display()))?;
    Ok(UploadedFile::new(name, content))
}

async fn connect_store(settings: &Settings, hnsw: bool) -> Result<PgVectorStore> {
    PgVectorStore::connect(&settings.database_url, settings.store_config(hnsw))
        .await
        .context("failed to connect to PostgreSQL")
}

async fn build_service(settings: &Settings, with_generator: bool) -> Result<KnowledgeService> {
    // The table is created by `init-schema`.
    let store = connect_store(settings, false).await?;

    let openai = OpenAIEmbedderFactory::new(settings.openai.clone())?;
    let mut embedders = LayeredEmbedderFactory::new(Arc::new(openai), settings.knowledge.retry.clone());

    let mut history = None;
    if let Some(url) = &settings.redis_url {
        match RedisEmbeddingCache::connect(url).await {
            Ok(cache) => embedders = embedders.with_cache(Arc::new(cache)),
            Err(e) => warn!(error = %e, "embedding cache unavailable, continuing without it"),
        }
        if with_generator {
            history = Some(RedisChatHistory::connect(url).await?);
        }
    }

    let mut builder = KnowledgeService::builder(settings.knowledge.clone())
        .embedders(Arc::new(embedders))
        .vector_store(Arc::new(store));
    if with_generator {
        let generator =
            OpenAIAnswerGenerator::new(settings.openai.clone(), settings.knowledge.retry.clone())?;
        builder = builder.generator(Arc::new(generator));
    }
    if let Some(history) = history {
        builder = builder.history(Arc::new(history));
    }

    info!(table = %settings.table, generator = with_generator, "knowledge service ready");
    Ok(builder.build()?)
}

fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
