// src/llm/mod.rs
// Chat model abstraction - pluggable streaming providers

pub mod ollama;
pub mod openai;

pub use ollama::OllamaChatModel;
pub use openai::OpenAIChatModel;

use crate::prompt::ChatPrompt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Finite, non-restartable sequence of generated tokens.
pub type TokenStream = BoxStream<'static, Result<String, LLMError>>;

/// Chat model trait - implement this to support new providers
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a generation. Tokens arrive in generation order.
    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream, LLMError>;
    fn model_name(&self) -> &str;
}

/// Configuration for different chat providers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum LLMConfig {
    /// OpenAI-compatible chat completions API
    OpenAI {
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
    },
    /// Local model served by Ollama
    Ollama {
        ollama_url: String,
        model: String,
        temperature: f32,
    },
}

/// Error types for LLM operations
#[derive(Debug, Clone)]
pub enum LLMError {
    ConnectionFailed(String),
    InvalidResponse(String),
    GenerationFailed(String),
    ConfigError(String),
}

impl std::fmt::Display for LLMError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "LLM connection failed: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid LLM response: {}", msg),
            Self::GenerationFailed(msg) => write!(f, "Generation failed: {}", msg),
            Self::ConfigError(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for LLMError {}

/// Factory function to create a chat model from config
pub fn create_chat_model(config: LLMConfig) -> Result<Arc<dyn ChatModel>, LLMError> {
    match config {
        LLMConfig::OpenAI {
            api_key,
            base_url,
            model,
            temperature,
        } => {
            if api_key.trim().is_empty() {
                return Err(LLMError::ConfigError("OpenAI API key is empty".to_string()));
            }
            info!(model = %model, base_url = %base_url, temperature, "Initializing OpenAI chat model");
            Ok(Arc::new(OpenAIChatModel::new(api_key, base_url, model, temperature)))
        }
        LLMConfig::Ollama {
            ollama_url,
            model,
            temperature,
        } => {
            info!(model = %model, url = %ollama_url, temperature, "Initializing Ollama chat model");
            Ok(Arc::new(OllamaChatModel::new(ollama_url, model, temperature)))
        }
    }
}
