// tests/common/mod.rs
// Shared mocks for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trpg::chunker::CharacterTextSplitter;
use trpg::embedder::{EmbeddingError, EmbeddingVector, Embeddings, HashEmbeddings};
use trpg::llm::{ChatModel, LLMError, TokenStream};
use trpg::path_manager::PathManager;
use trpg::pipeline::DEFAULT_TOP_K;
use trpg::prompt::ChatPrompt;
use trpg::{EmbeddingPipeline, PageController};

/// Hash embeddings that count how many texts they were asked to embed.
pub struct CountingEmbeddings {
    inner: HashEmbeddings,
    pub documents: AtomicUsize,
}

impl CountingEmbeddings {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddings::new(128),
            documents: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.documents.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embeddings for CountingEmbeddings {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        self.documents.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.inner.embed_query(text).await
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}

/// Hash embeddings that take `delay` for every document batch.
pub struct SlowEmbeddings {
    inner: HashEmbeddings,
    delay: Duration,
}

impl SlowEmbeddings {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashEmbeddings::new(128),
            delay,
        }
    }
}

#[async_trait]
impl Embeddings for SlowEmbeddings {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.inner.embed_query(text).await
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Replies with fixed tokens and records every prompt it sees.
pub struct ScriptedModel {
    tokens: Vec<String>,
    fail: bool,
    pub prompts: Mutex<Vec<ChatPrompt>>,
}

impl ScriptedModel {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Emits its tokens, then a connection error.
    pub fn failing(tokens: &[&str]) -> Self {
        Self {
            fail: true,
            ..Self::new(tokens)
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream, LLMError> {
        self.prompts.lock().push(prompt.clone());
        let mut items: Vec<Result<String, LLMError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        if self.fail {
            items.push(Err(LLMError::ConnectionFailed("connection reset".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn pipeline(dir: &Path, embeddings: Arc<dyn Embeddings>) -> EmbeddingPipeline {
    EmbeddingPipeline::new(
        PathManager::with_base(dir).expect("cache dir"),
        CharacterTextSplitter::default(),
        embeddings,
        DEFAULT_TOP_K,
    )
}

pub fn controller(dir: &Path, model: Arc<dyn ChatModel>) -> PageController {
    let pipeline = pipeline(dir, Arc::new(CountingEmbeddings::new()));
    PageController::new(Arc::new(pipeline), model)
}

pub const RULEBOOK: &str = "Character creation\n\
Each player starts with 3 gold coins.\n\
Health is tracked on a four step track.\n\
Mental strain rises when a player sees a monster.\n\
Combat\n\
Roll two dice and add your strength.\n";
