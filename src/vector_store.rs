// src/vector_store.rs
// Flat in-memory vector index over the chunks of one document.

use crate::chunker::Chunk;
use crate::embedder::{similarity, EmbeddingVector};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VectorStoreError {
    #[error("Got {vectors} vectors for {chunks} chunks")]
    LengthMismatch { chunks: usize, vectors: usize },
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: EmbeddingVector,
}

/// Search result with similarity score
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    records: Vec<VectorRecord>,
    dimension: Option<usize>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from chunks and their embeddings, pairwise.
    pub fn from_embeddings(
        chunks: Vec<Chunk>,
        embeddings: Vec<EmbeddingVector>,
    ) -> Result<Self, VectorStoreError> {
        if chunks.len() != embeddings.len() {
            return Err(VectorStoreError::LengthMismatch {
                chunks: chunks.len(),
                vectors: embeddings.len(),
            });
        }
        let mut store = Self::new();
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            store.insert(chunk, embedding)?;
        }
        info!(
            vectors = store.len(),
            dimension = store.dimension.unwrap_or(0),
            "Vector store built"
        );
        Ok(store)
    }

    pub fn insert(&mut self, chunk: Chunk, embedding: EmbeddingVector) -> Result<(), VectorStoreError> {
        match self.dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                })
            }
            None => self.dimension = Some(embedding.len()),
            _ => {}
        }
        self.records.push(VectorRecord { chunk, embedding });
        Ok(())
    }

    /// Top-k records by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        let candidates = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.embedding.as_slice()));
        let results: Vec<SearchResult> = similarity::top_k_similar(query, candidates, k)
            .into_iter()
            .map(|(i, score)| SearchResult {
                chunk: self.records[i].chunk.clone(),
                similarity_score: score,
            })
            .collect();
        debug!(k, hits = results.len(), "Vector search");
        results
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: usize, content: &str) -> Chunk {
        Chunk {
            id: format!("doc#{}", i),
            content: content.to_string(),
            chunk_index: i,
            token_count: 1,
            source: "doc".to_string(),
        }
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let store = VectorStore::from_embeddings(
            vec![chunk(0, "x"), chunk(1, "y"), chunk(2, "mostly x")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.8, 0.2]],
        )
        .unwrap();

        let results = store.search(&[1.0, 0.0], 2);
        let contents: Vec<_> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["x", "mostly x"]);
        assert!(results[0].similarity_score >= results[1].similarity_score);
    }

    #[test]
    fn test_k_larger_than_store() {
        let store = VectorStore::from_embeddings(vec![chunk(0, "only")], vec![vec![1.0]]).unwrap();
        assert_eq!(store.search(&[1.0], 4).len(), 1);
        assert!(VectorStore::new().search(&[1.0], 4).is_empty());
    }

    #[test]
    fn test_mismatches_are_rejected() {
        assert_eq!(
            VectorStore::from_embeddings(vec![chunk(0, "a")], vec![]).unwrap_err(),
            VectorStoreError::LengthMismatch { chunks: 1, vectors: 0 }
        );
        assert_eq!(
            VectorStore::from_embeddings(
                vec![chunk(0, "a"), chunk(1, "b")],
                vec![vec![1.0, 0.0], vec![1.0]]
            )
            .unwrap_err(),
            VectorStoreError::DimensionMismatch { expected: 2, actual: 1 }
        );
    }
}
