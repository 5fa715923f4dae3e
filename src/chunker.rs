// src/chunker.rs
//! Separator-based text splitting with overlap.
//!
//! The text is cut on a separator (a newline by default) and the pieces are
//! greedily merged back into chunks no longer than `chunk_size` length units.
//! When a chunk is emitted, pieces are dropped from its front until at most
//! `chunk_overlap` units remain, and those carry over into the next chunk.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 600;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub source: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) is larger than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
}

/// How chunk length is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Chars,
    EstimatedTokens,
}

impl LengthUnit {
    pub fn measure(&self, text: &str) -> usize {
        match self {
            LengthUnit::Chars => text.chars().count(),
            LengthUnit::EstimatedTokens => estimate_tokens(text),
        }
    }
}

/// Estimate token count.
///
/// ASCII text: 1 token ≈ 4 chars or 0.75 words. Any other character, such as
/// Hangul, counts as a token of its own.
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, other) = text.chars().fold((0, 0), |(ascii, other), c| {
        if c.is_ascii() {
            (ascii + 1, other)
        } else {
            (ascii, other + 1)
        }
    });
    let ascii_words = text.split_whitespace().filter(|w| w.is_ascii()).count();
    (ascii / 4 + ascii_words * 4 / 3) / 2 + other
}

#[derive(Debug, Clone)]
pub struct CharacterTextSplitter {
    separator: String,
    chunk_size: usize,
    chunk_overlap: usize,
    length_unit: LengthUnit,
}

impl CharacterTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if chunk_overlap > chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            chunk_size,
            chunk_overlap,
            length_unit: LengthUnit::EstimatedTokens,
        })
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_length_unit(mut self, unit: LengthUnit) -> Self {
        self.length_unit = unit;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into overlapping chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = if self.separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(self.separator.as_str())
                .filter(|s| !s.is_empty())
                .collect()
        };
        self.merge_pieces(&pieces)
    }

    /// Split a whole document into chunks tagged with `source`.
    pub fn split_document(&self, text: &str, source: &str) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = self
            .split_text(text)
            .into_iter()
            .enumerate()
            .map(|(idx, content)| Chunk {
                id: format!("{}#{}", source, idx),
                token_count: estimate_tokens(&content),
                content,
                chunk_index: idx,
                source: source.to_string(),
            })
            .collect();

        debug!(
            source = %source,
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "Document split"
        );
        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let sep_len = self.length_unit.measure(&self.separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = self.length_unit.measure(piece);
            let joiner = |current: &VecDeque<&str>| if current.is_empty() { 0 } else { sep_len };

            if total + len + joiner(&current) > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        length = total,
                        chunk_size = self.chunk_size,
                        "Created a chunk longer than the configured size"
                    );
                }
                if !current.is_empty() {
                    if let Some(chunk) = self.join(&current) {
                        chunks.push(chunk);
                    }
                    // Shrink from the front until only the overlap is left,
                    // or until the next piece fits.
                    while total > self.chunk_overlap
                        || (total > 0 && total + len + joiner(&current) > self.chunk_size)
                    {
                        let Some(first) = current.pop_front() else {
                            break;
                        };
                        let dropped = self.length_unit.measure(first) + joiner(&current);
                        total = total.saturating_sub(dropped);
                    }
                }
            }

            current.push_back(piece);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }

        if let Some(chunk) = self.join(&current) {
            chunks.push(chunk);
        }
        chunks
    }

    fn join(&self, pieces: &VecDeque<&str>) -> Option<String> {
        let mut out = String::new();
        for (i, piece) in pieces.iter().enumerate() {
            if i > 0 {
                out.push_str(&self.separator);
            }
            out.push_str(piece);
        }
        let trimmed = out.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Default for CharacterTextSplitter {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            length_unit: LengthUnit::EstimatedTokens,
        }
    }
}
