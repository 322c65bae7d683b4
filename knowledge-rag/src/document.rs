//! Data types for documents, chunks, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier (typically a URI) used for replacement and deletion.
    pub source_id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata copied onto every chunk.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), text: text.into(), metadata: HashMap::new() }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Identifier of the form `{source_id}#{index}`.
    pub id: String,
    /// The source identifier of the parent [`Document`].
    pub source_id: String,
    /// Position of this chunk within its document, starting at zero.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the first character of `text` in the document.
    pub start: usize,
    /// Byte offset one past the last character of `text` in the document.
    pub end: usize,
    /// The vector embedding for this chunk's text. Empty until embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus `chunk_index`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Build the chunk identifier for a given source and index.
    pub fn make_id(source_id: &str, index: usize) -> String {
        format!("{source_id}#{index}")
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// Restricts which stored chunks a search may return.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilter {
    /// Only return chunks from these sources. Empty means any source.
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// Only return chunks whose metadata contains every one of these pairs.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SearchFilter {
    /// A filter matching a single source.
    pub fn source(source_id: impl Into<String>) -> Self {
        Self { source_ids: vec![source_id.into()], metadata: HashMap::new() }
    }

    /// Whether a chunk passes this filter.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if !self.source_ids.is_empty() && !self.source_ids.iter().any(|s| *s == chunk.source_id) {
            return false;
        }
        self.metadata.iter().all(|(k, v)| chunk.metadata.get(k) == Some(v))
    }
}
