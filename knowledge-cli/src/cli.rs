//! Command-line arguments.
//!
//! Connection settings fall back to the environment (a `.env` file is loaded
//! first), so flags only need to be given to override it.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ingest text files into a vector store and answer questions from them.
#[derive(Parser, Debug)]
#[command(name = "knowledge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// PostgreSQL connection string (pgvector extension required)
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Redis connection string for the embedding cache and chat history
    #[arg(long, env = "REDIS_URL", global = true, hide_env_values = true)]
    pub redis_url: Option<String>,

    /// API key for the embedding and chat models
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", global = true)]
    pub openai_base_url: Option<String>,

    /// Embedding model name
    #[arg(long, env = "OPENAI_EMBEDDINGS_MODEL", global = true)]
    pub embedding_model: Option<String>,

    /// Chat model used by `retrieve --answer`
    #[arg(long, env = "OPENAI_CHAT_MODEL", global = true)]
    pub chat_model: Option<String>,

    /// Table holding the chunks
    #[arg(long, env = "KNOWLEDGE_TABLE", global = true, default_value = "knowledge_chunks")]
    pub table: String,

    /// Log filter, e.g. `info` or `knowledge_rag=debug` (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Knowledge commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the pgvector extension, table and indexes
    InitSchema {
        /// Build an approximate HNSW index instead of exact search
        #[arg(long)]
        hnsw: bool,
    },

    /// Ingest a text file, replacing any earlier version of its source
    Ingest {
        /// File to ingest
        path: PathBuf,

        /// Source identifier (defaults to the file name)
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Delete every chunk of a source
    Delete {
        /// Source identifier
        url: String,
    },

    /// Retrieve context for a question
    Retrieve {
        /// The question
        question: String,

        /// Caller identity, used as the chat history session
        #[arg(short, long)]
        user_id: Option<String>,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Generate an answer with the chat model
        #[arg(short, long)]
        answer: bool,

        /// Answer from the best-matching document only
        #[arg(short, long)]
        single_source: bool,
    },
}
