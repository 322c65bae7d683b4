//! `knowledge`: ingest text files into pgvector and retrieve context for
//! questions.
//!
//! # Usage
//!
//! ```bash
//! knowledge init-schema [--hnsw]   # once, before any other command
//! knowledge ingest notes.txt [--url https://example.com/notes]
//! knowledge delete https://example.com/notes
//! knowledge retrieve "what do the notes say?" [--user-id alice] [--answer] [--single-source]
//! ```
//!
//! # Configuration
//!
//! Loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. `.env` file in the working directory
//! 3. Environment variables (`DATABASE_URL`, `OPENAI_*`, `KNOWLEDGE_*`, ...)
//! 4. CLI flags

mod cli;
mod commands;
mod settings;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let settings = Settings::resolve(&cli)?;
    commands::run(cli.command, settings).await
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
