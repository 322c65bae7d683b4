//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`] — splits by character count with configurable overlap
//! - [`RecursiveChunker`] — splits hierarchically by paragraphs, lines, sentences, then words
//!
//! Sizes are measured in characters. Chunk offsets are byte offsets into the
//! document text and always fall on character boundaries, so
//! `&document.text[chunk.start..chunk.end] == chunk.text`.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{Chunk, Document};
use crate::error::{KnowledgeError, Result};

/// Separators tried by [`RecursiveChunker`], coarsest first.
const RECURSIVE_SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text, offsets and metadata but no
/// embeddings. Embeddings are attached later by the ingestion pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks, in document order.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Which [`Chunker`] to build from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// [`FixedSizeChunker`].
    Fixed,
    /// [`RecursiveChunker`].
    #[default]
    Recursive,
}

impl ChunkingStrategy {
    /// Build the chunker for this strategy.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if the size parameters are invalid.
    pub fn build(self, chunk_size: usize, chunk_overlap: usize) -> Result<Arc<dyn Chunker>> {
        Ok(match self {
            Self::Fixed => Arc::new(FixedSizeChunker::new(chunk_size, chunk_overlap)?),
            Self::Recursive => Arc::new(RecursiveChunker::new(chunk_size, chunk_overlap)?),
        })
    }
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "recursive" => Ok(Self::Recursive),
            other => Err(KnowledgeError::ConfigError(format!("unknown chunking strategy '{other}'"))),
        }
    }
}

fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(KnowledgeError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(KnowledgeError::ConfigError(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// Window `i` starts at character `i * (chunk_size - chunk_overlap)`. Generation
/// stops at the first window that reaches the end of the text, so a text of
/// `L` characters yields `ceil((L - overlap) / (chunk_size - overlap))` chunks,
/// and exactly one when `L <= chunk_size`.
///
/// # Example
///
/// ```rust,ignore
/// use knowledge_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(200, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let ranges = fixed_windows(&document.text, 0, self.chunk_size, self.chunk_overlap);
        build_chunks(document, ranges)
    }
}

/// Splits text hierarchically: paragraphs → lines → sentences → words.
///
/// Text is cut at the coarsest separator that occurs in it, keeping each
/// separator attached to the preceding piece. Adjacent pieces are merged into
/// windows of at most `chunk_size` characters; when a window is emitted, its
/// trailing pieces totalling at most `chunk_overlap` characters are carried
/// into the next one. Pieces longer than `chunk_size` are split with the next
/// separator, and finally by character count.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let ranges = recursive_windows(
            &document.text,
            0,
            self.chunk_size,
            self.chunk_overlap,
            &RECURSIVE_SEPARATORS,
        );
        build_chunks(document, ranges)
    }
}

fn build_chunks(document: &Document, ranges: Vec<Range<usize>>) -> Vec<Chunk> {
    ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), index.to_string());
            Chunk {
                id: Chunk::make_id(&document.source_id, index),
                source_id: document.source_id.clone(),
                index,
                text: document.text[range.clone()].to_string(),
                start: range.start,
                end: range.end,
                embedding: Vec::new(),
                metadata,
            }
        })
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offsets of every character start, plus `text.len()`.
fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect()
}

/// Fixed-size character windows over `text`, returned as byte ranges shifted by `base`.
fn fixed_windows(
    text: &str,
    base: usize,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Range<usize>> {
    let bounds = char_bounds(text);
    let len = bounds.len() - 1;
    if len == 0 {
        return Vec::new();
    }

    let step = chunk_size - chunk_overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        windows.push(base + bounds[start]..base + bounds[end]);
        if end == len {
            break;
        }
        start += step;
    }
    windows
}

/// Split `text` at `separator`, keeping the separator on the preceding piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        pieces.push(start..end);
        start = end;
    }

    if start < text.len() {
        pieces.push(start..text.len());
    }

    pieces
}

fn recursive_windows(
    text: &str,
    base: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<Range<usize>> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if char_len(text) <= chunk_size {
        return vec![base..base + text.len()];
    }
    let Some((separator, remaining)) = separators.split_first() else {
        return fixed_windows(text, base, chunk_size, chunk_overlap);
    };

    let pieces = split_keeping_separator(text, separator);
    if pieces.len() <= 1 {
        return recursive_windows(text, base, chunk_size, chunk_overlap, remaining);
    }

    let mut out = Vec::new();
    let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
    let mut window_len = 0;
    // Whether the window holds a piece not yet emitted.
    let mut fresh = false;

    let emit = |window: &VecDeque<(Range<usize>, usize)>, out: &mut Vec<Range<usize>>| {
        if let (Some((first, _)), Some((last, _))) = (window.front(), window.back()) {
            let range = first.start..last.end;
            if !text[range.clone()].trim().is_empty() {
                out.push(base + range.start..base + range.end);
            }
        }
    };

    for piece in pieces {
        let piece_len = char_len(&text[piece.clone()]);

        if piece_len > chunk_size {
            if fresh {
                emit(&window, &mut out);
            }
            window.clear();
            window_len = 0;
            fresh = false;
            out.extend(recursive_windows(
                &text[piece.clone()],
                base + piece.start,
                chunk_size,
                chunk_overlap,
                remaining,
            ));
            continue;
        }

        if window_len + piece_len > chunk_size && !window.is_empty() {
            if fresh {
                emit(&window, &mut out);
            }
            while window_len > chunk_overlap || (window_len > 0 && window_len + piece_len > chunk_size)
            {
                match window.pop_front() {
                    Some((_, len)) => window_len -= len,
                    None => break,
                }
            }
        }

        window.push_back((piece, piece_len));
        window_len += piece_len;
        fresh = true;
    }

    if fresh {
        emit(&window, &mut out);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.start, c.end)).collect()
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(FixedSizeChunker::new(100, 100), Err(KnowledgeError::ConfigError(_))));
        assert!(matches!(RecursiveChunker::new(100, 150), Err(KnowledgeError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(0, 0), Err(KnowledgeError::ConfigError(_))));
        assert!(FixedSizeChunker::new(100, 99).is_ok());
    }

    #[test]
    fn fixed_windows_for_500_chars() {
        let doc = Document::new("doc", "x".repeat(500));
        let chunks = FixedSizeChunker::new(200, 50).unwrap().chunk(&doc);
        assert_eq!(offsets(&chunks), vec![(0, 200), (150, 350), (300, 500)]);
        assert_eq!(chunks[1].id, "doc#1");
        assert_eq!(chunks[2].metadata.get("chunk_index").map(String::as_str), Some("2"));
    }

    #[test]
    fn short_document_yields_one_chunk() {
        let doc = Document::new("doc", "short text");
        let chunks = FixedSizeChunker::new(200, 50).unwrap().chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");

        let chunks = RecursiveChunker::new(200, 50).unwrap().chunk(&doc);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn empty_document_yields_nothing() {
        let doc = Document::new("doc", "");
        assert!(FixedSizeChunker::new(10, 2).unwrap().chunk(&doc).is_empty());
        assert!(RecursiveChunker::new(10, 2).unwrap().chunk(&doc).is_empty());
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let doc = Document::new("doc", "héllo wörld ünïcode");
        let chunks = FixedSizeChunker::new(5, 1).unwrap().chunk(&doc);
        for chunk in &chunks {
            assert_eq!(&doc.text[chunk.start..chunk.end], chunk.text);
            assert!(chunk.text.chars().count() <= 5);
        }
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(40), "b".repeat(40), "c".repeat(40));
        let doc = Document::new("doc", text);
        let chunks = RecursiveChunker::new(50, 0).unwrap().chunk(&doc);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.starts_with('a'));
        assert!(chunks[1].text.starts_with('b'));
        assert_eq!(chunks[2].text, "c".repeat(40));
    }

    #[test]
    fn recursive_carries_overlap_between_windows() {
        let doc = Document::new("doc", "one two three four five six seven eight nine ten");
        let chunks = RecursiveChunker::new(15, 6).unwrap().chunk(&doc);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "expected overlap between {pair:?}");
            assert!(pair[1].start > pair[0].start);
        }
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 15);
            assert_eq!(&doc.text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn recursive_falls_back_to_character_split() {
        let doc = Document::new("doc", "z".repeat(25));
        let chunks = RecursiveChunker::new(10, 2).unwrap().chunk(&doc);
        assert_eq!(offsets(&chunks), vec![(0, 10), (8, 18), (16, 25)]);
    }

    #[test]
    fn strategy_parses_and_builds() {
        assert_eq!("fixed".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::Fixed);
        assert_eq!("Recursive".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::Recursive);
        assert!("semantic".parse::<ChunkingStrategy>().is_err());
        assert!(ChunkingStrategy::Fixed.build(10, 10).is_err());
    }
}
