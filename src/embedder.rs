// src/embedder.rs
// Embedding providers plus a cache-backed wrapper that persists vectors per chunk.

use crate::cache::{ByteStore, CacheError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type EmbeddingVector = Vec<f32>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("Corrupt cached embedding {key}: {reason}")]
    CorruptEntry { key: String, reason: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[async_trait]
pub trait Embeddings: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String])
        -> Result<Vec<EmbeddingVector>, EmbeddingError>;
    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub enum EmbeddingsConfig {
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAI {
        api_key: String,
        base_url: String,
        model: String,
    },
    /// Local feature hashing, no network
    Hash { dimensions: usize },
}

pub fn create_embeddings(config: EmbeddingsConfig) -> Arc<dyn Embeddings> {
    match config {
        EmbeddingsConfig::OpenAI {
            api_key,
            base_url,
            model,
        } => {
            info!(model = %model, base_url = %base_url, "Using OpenAI embeddings");
            Arc::new(OpenAIEmbeddings::new(api_key, base_url, model))
        }
        EmbeddingsConfig::Hash { dimensions } => {
            info!(dimensions, "Using local hash embeddings");
            Arc::new(HashEmbeddings::new(dimensions))
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAIEmbeddings {
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: EmbeddingVector,
}

impl OpenAIEmbeddings {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            batch_size: 32,
            client: reqwest::Client::new(),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RequestFailed(format!("{}: {}", status, body)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if parsed.data.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embeddings for OpenAIEmbeddings {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch_len = batch.len(), model = %self.model, "Requesting embeddings");
            results.extend(self.embed_batch(batch).await?);
        }
        Ok(results)
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding list".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Local hashing
// ---------------------------------------------------------------------------

/// Signed feature hashing over lowercase words, L2-normalised.
pub struct HashEmbeddings {
    dimensions: usize,
    name: String,
}

impl HashEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("hash-{}", dimensions),
        }
    }

    pub fn embed(&self, text: &str) -> EmbeddingVector {
        let mut vec = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = seahash::hash(word.to_lowercase().as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vec[bucket] += sign;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        }
        vec
    }
}

#[async_trait]
impl Embeddings for HashEmbeddings {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        Ok(self.embed(text))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Cache-backed wrapper
// ---------------------------------------------------------------------------

/// Looks document embeddings up in a byte store before asking the underlying
/// provider, and writes back whatever it had to compute. Queries are not cached.
pub struct CacheBackedEmbeddings {
    underlying: Arc<dyn Embeddings>,
    store: Arc<dyn ByteStore>,
    namespace: String,
    computed: AtomicUsize,
}

impl CacheBackedEmbeddings {
    pub fn new(underlying: Arc<dyn Embeddings>, store: Arc<dyn ByteStore>) -> Self {
        let namespace = underlying
            .model_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            underlying,
            store,
            namespace,
            computed: AtomicUsize::new(0),
        }
    }

    pub fn cache_key(&self, text: &str) -> String {
        format!("{}-{:016x}", self.namespace, seahash::hash(text.as_bytes()))
    }

    /// Number of texts this wrapper had to send to the underlying provider.
    pub fn computed_count(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }
}

#[async_trait]
impl Embeddings for CacheBackedEmbeddings {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();
        let cached = self.store.mget(&keys)?;

        let mut vectors: Vec<Option<EmbeddingVector>> = Vec::with_capacity(texts.len());
        for (key, entry) in keys.iter().zip(cached) {
            let vector = match entry {
                Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                    EmbeddingError::CorruptEntry {
                        key: key.clone(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            vectors.push(vector);
        }

        let missing: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();

        debug!(
            total = texts.len(),
            cached = texts.len() - missing.len(),
            missing = missing.len(),
            "Embedding cache lookup"
        );

        if !missing.is_empty() {
            let missing_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.underlying.embed_documents(&missing_texts).await?;
            if fresh.len() != missing.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    missing.len(),
                    fresh.len()
                )));
            }

            let mut items = Vec::with_capacity(missing.len());
            for (&i, vector) in missing.iter().zip(fresh) {
                let bytes = serde_json::to_vec(&vector).map_err(|e| EmbeddingError::CorruptEntry {
                    key: keys[i].clone(),
                    reason: e.to_string(),
                })?;
                items.push((keys[i].clone(), bytes));
                vectors[i] = Some(vector);
            }
            self.store.mset(items)?;
            self.computed.fetch_add(missing.len(), Ordering::Relaxed);
        }

        Ok(vectors.into_iter().flatten().collect())
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.underlying.embed_query(text).await
    }

    fn model_name(&self) -> &str {
        self.underlying.model_name()
    }
}

/// Similarity search helper functions
pub mod similarity {
    /// Cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            0.0
        } else {
            dot / (mag_a * mag_b)
        }
    }

    /// Find top-k most similar embeddings, best first
    pub fn top_k_similar<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<(usize, f32)>
    where
        I: IntoIterator<Item = (usize, &'a [f32])>,
    {
        let mut scores: Vec<_> = candidates
            .into_iter()
            .map(|(idx, emb)| (idx, cosine_similarity(query, emb)))
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        scores
    }
}
