// src/config.rs
use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedder::EmbeddingsConfig;
use crate::llm::LLMConfig;
use crate::path_manager::{PathError, PathManager};
use crate::pipeline::DEFAULT_TOP_K;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("Unknown {name}: {value}")]
    UnknownProvider { name: &'static str, value: String },
    #[error("OPENAI_API_KEY is required for the {0} provider")]
    MissingApiKey(&'static str),
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub path_manager: PathManager,
    pub rulebook_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub llm: LLMConfig,
    pub embeddings: EmbeddingsConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("BACKEND_PORT", 3010u16, "u16")?;
        let path_manager = PathManager::from_env()?;
        let rulebook_path = PathBuf::from(
            env::var("RULEBOOK_PATH").unwrap_or_else(|_| "Rule_Book.docx".to_string()),
        );
        let chunk_size = parse_var("CHUNK_SIZE", DEFAULT_CHUNK_SIZE, "usize")?;
        let chunk_overlap = parse_var("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP, "usize")?;
        let top_k = parse_var("RETRIEVER_TOP_K", DEFAULT_TOP_K, "usize")?;

        Ok(Self {
            host,
            port,
            path_manager,
            rulebook_path,
            chunk_size,
            chunk_overlap,
            top_k,
            llm: llm_from_env()?,
            embeddings: embeddings_from_env()?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn openai_base_url() -> String {
    env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn llm_from_env() -> Result<LLMConfig, ConfigError> {
    let temperature = parse_var("LLM_TEMPERATURE", 0.1f32, "f32")?;
    let provider = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());

    match provider.to_lowercase().as_str() {
        "openai" => Ok(LLMConfig::OpenAI {
            api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| ConfigError::MissingApiKey("openai chat"))?,
            base_url: openai_base_url(),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            temperature,
        }),
        "ollama" => Ok(LLMConfig::Ollama {
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3".to_string()),
            temperature,
        }),
        _ => Err(ConfigError::UnknownProvider {
            name: "LLM_PROVIDER",
            value: provider,
        }),
    }
}

fn embeddings_from_env() -> Result<EmbeddingsConfig, ConfigError> {
    let provider = env::var("EMBEDDINGS_PROVIDER").unwrap_or_else(|_| "openai".to_string());

    match provider.to_lowercase().as_str() {
        "openai" => Ok(EmbeddingsConfig::OpenAI {
            api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| ConfigError::MissingApiKey("openai embeddings"))?,
            base_url: openai_base_url(),
            model: env::var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
        }),
        "hash" => Ok(EmbeddingsConfig::Hash {
            dimensions: parse_var("HASH_EMBEDDING_DIM", 384usize, "usize")?,
        }),
        _ => Err(ConfigError::UnknownProvider {
            name: "EMBEDDINGS_PROVIDER",
            value: provider,
        }),
    }
}
