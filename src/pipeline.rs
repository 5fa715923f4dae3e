// src/pipeline.rs
//! Document -> retriever, memoised per document content.
//!
//! `prepare` persists the raw bytes, extracts the text, splits it, embeds every
//! chunk through a file-backed embedding cache and wraps the resulting vector
//! store in a [`Retriever`]. Byte-identical input is built once per process
//! while it stays among the [`MEMO_CAPACITY`] most recently prepared documents;
//! chunk embeddings are reused across processes through the on-disk cache.

use crate::cache::{CacheError, LocalFileStore};
use crate::chunker::{CharacterTextSplitter, Chunk};
use crate::embedder::{CacheBackedEmbeddings, EmbeddingError, EmbeddingVector, Embeddings};
use crate::loader::{load_text, Document, LoadError};
use crate::path_manager::{PathError, PathManager};
use crate::vector_store::{VectorStore, VectorStoreError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};

/// Chunks returned per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Prepared documents kept alive by the memo.
pub const MEMO_CAPACITY: usize = 8;

const QUERY_CACHE_SIZE: usize = 128;

type MemoSlot = Arc<OnceCell<Arc<Retriever>>>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Failed to persist document: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub prepare_calls: u64,
    pub memo_hits: u64,
    pub builds: u64,
}

/// Similarity search over one prepared document.
pub struct Retriever {
    document_name: String,
    store: VectorStore,
    embeddings: Arc<dyn Embeddings>,
    k: usize,
    query_cache: Mutex<LruCache<String, EmbeddingVector>>,
}

impl Retriever {
    pub fn new(
        document_name: String,
        store: VectorStore,
        embeddings: Arc<dyn Embeddings>,
        k: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            document_name,
            store,
            embeddings,
            k,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The `k` chunks most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>, PipelineError> {
        let cached = self.query_cache.lock().get(query).cloned();
        let query_vector = match cached {
            Some(vector) => {
                debug!(query_len = query.len(), "Query embedding cache hit");
                vector
            }
            None => {
                let vector = self.embeddings.embed_query(query).await?;
                self.query_cache.lock().put(query.to_string(), vector.clone());
                vector
            }
        };

        Ok(self
            .store
            .search(&query_vector, self.k)
            .into_iter()
            .map(|r| r.chunk)
            .collect())
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// Join retrieved chunks into the context string handed to the prompt.
pub fn format_docs(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct EmbeddingPipeline {
    path_manager: PathManager,
    splitter: CharacterTextSplitter,
    embeddings: Arc<dyn Embeddings>,
    top_k: usize,
    // Locked only to find or insert a slot; builds run inside the slot.
    memo: Mutex<LruCache<u64, MemoSlot>>,
    prepare_calls: AtomicU64,
    memo_hits: AtomicU64,
    builds: AtomicU64,
}

impl EmbeddingPipeline {
    pub fn new(
        path_manager: PathManager,
        splitter: CharacterTextSplitter,
        embeddings: Arc<dyn Embeddings>,
        top_k: usize,
    ) -> Self {
        Self {
            path_manager,
            splitter,
            embeddings,
            top_k,
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMO_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            prepare_calls: AtomicU64::new(0),
            memo_hits: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    pub fn memo_key(document: &Document) -> u64 {
        let mut keyed = Vec::with_capacity(document.name.len() + 1 + document.bytes.len());
        keyed.extend_from_slice(document.name.as_bytes());
        keyed.push(0);
        keyed.extend_from_slice(&document.bytes);
        seahash::hash(&keyed)
    }

    pub async fn prepare(&self, document: &Document) -> Result<Arc<Retriever>, PipelineError> {
        self.prepare_calls.fetch_add(1, Ordering::Relaxed);
        let key = Self::memo_key(document);

        let slot = Arc::clone(
            self.memo
                .lock()
                .get_or_insert(key, || Arc::new(OnceCell::new())),
        );

        // Callers of the same document wait on one build; other documents are not blocked.
        let mut built = false;
        let result = slot
            .get_or_try_init(|| {
                built = true;
                async move { self.build(document).await.map(Arc::new) }
            })
            .await;

        match result {
            Ok(retriever) if built => {
                self.builds.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(retriever))
            }
            Ok(retriever) => {
                self.memo_hits.fetch_add(1, Ordering::Relaxed);
                debug!(document = %document.name, "Retriever memo hit");
                Ok(Arc::clone(retriever))
            }
            Err(e) => {
                let mut memo = self.memo.lock();
                if memo
                    .peek(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !slot.initialized())
                {
                    memo.pop(&key);
                }
                Err(e)
            }
        }
    }

    /// Number of documents currently held by the memo.
    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }

    async fn build(&self, document: &Document) -> Result<Retriever, PipelineError> {
        let start = Instant::now();

        let file_path = self.path_manager.file_path(&document.name)?;
        tokio::fs::write(&file_path, &document.bytes).await?;
        debug!(path = %file_path.display(), bytes = document.bytes.len(), "Document persisted");

        let text = load_text(document)?;
        let chunks = self.splitter.split_document(&text, &document.name);
        debug!(document = %document.name, chunks = chunks.len(), "Document split");

        let store = LocalFileStore::new(self.path_manager.embeddings_path(&document.name)?)?;
        let cached = CacheBackedEmbeddings::new(Arc::clone(&self.embeddings), Arc::new(store));
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = cached.embed_documents(&texts).await?;

        let store = VectorStore::from_embeddings(chunks, vectors)?;
        info!(
            document = %document.name,
            chunks = store.len(),
            computed = cached.computed_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retriever built"
        );

        Ok(Retriever::new(
            document.name.clone(),
            store,
            Arc::clone(&self.embeddings),
            self.top_k,
        ))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            prepare_calls: self.prepare_calls.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }
}
