// trpg/src/main.rs
use std::sync::Arc;
use trpg::api::start_api_server;
use trpg::chunker::CharacterTextSplitter;
use trpg::config::ApiConfig;
use trpg::embedder::create_embeddings;
use trpg::llm::create_chat_model;
use trpg::monitoring::{init_tracing, MonitoringConfig};
use trpg::{EmbeddingPipeline, PageController};
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let monitoring = MonitoringConfig::from_env();
    let _log_guard = init_tracing(&monitoring)?;

    let config = match ApiConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };
    info!(cache_dir = %config.path_manager.base_dir().display(), "Configuration loaded");

    let splitter = CharacterTextSplitter::new(config.chunk_size, config.chunk_overlap)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let model = create_chat_model(config.llm.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let embeddings = create_embeddings(config.embeddings.clone());

    let pipeline = EmbeddingPipeline::new(
        config.path_manager.clone(),
        splitter,
        embeddings,
        config.top_k,
    );
    let controller = Arc::new(PageController::new(Arc::new(pipeline), model));

    match controller.load_rulebook_from_path(&config.rulebook_path).await {
        Ok(info) => info!(rulebook = %info.name, chunks = info.chunks, "Rulebook ready"),
        Err(e) => warn!(
            path = %config.rulebook_path.display(),
            error = %e,
            "Rulebook not loaded; waiting for POST /rulebook"
        ),
    }

    info!("Starting API server on http://{} ...", config.bind_addr());
    start_api_server(&config, controller)?.await
}
