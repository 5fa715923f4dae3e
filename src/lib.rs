pub mod path_manager;
pub mod config;
pub mod session;
pub mod loader;
pub mod chunker;
pub mod cache;
pub mod embedder;
pub mod vector_store;
pub mod pipeline;
pub mod prompt;
pub mod llm;
pub mod chat;
pub mod controller;
pub mod api;
pub mod middleware;
pub mod monitoring;

pub use controller::{PageController, PageError, PageView};
pub use pipeline::{EmbeddingPipeline, Retriever};
pub use session::{ChatMessage, Role, Session, SessionStore};
