// src/controller.rs
//! Page event handlers.
//!
//! The page is driven by three explicit events:
//!
//! - [`PageController::render`]: a pure read of the session, safe to call any number of times.
//! - [`PageController::start_turn`] + [`PendingTurn::run`]: one question/answer round.
//! - [`PageController::upload_rulebook`]: swap the document answers are drawn from.
//!
//! `submit` is `start_turn` followed by `run`. The HTTP layer calls the two
//! halves separately so validation errors can be returned before any
//! streaming response is opened.

use crate::chat::{stream_into, ChatCallbackSink, ChatError, DisplaySink};
use crate::llm::ChatModel;
use crate::loader::{Document, LoadError};
use crate::pipeline::{format_docs, EmbeddingPipeline, PipelineError, Retriever};
use crate::prompt::assemble;
use crate::session::{ChatMessage, GenerationGuard, Session, SessionStore, StatTracks};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const TITLE: &str = "TRPG";
pub const GREETING: &str = "I'm ready! Ask away!";

#[derive(Error, Debug)]
pub enum PageError {
    #[error("A response is already being generated for this session")]
    Busy,
    #[error("No rulebook has been loaded")]
    NoRulebook,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Everything the page shows for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub session_id: String,
    pub title: &'static str,
    pub stats: StatTracks,
    /// Scene image slot, always empty for now.
    pub scene: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulebookInfo {
    pub name: String,
    pub chunks: usize,
    pub prepared_at: DateTime<Utc>,
}

struct ActiveRulebook {
    document: Arc<Document>,
    info: RulebookInfo,
}

pub struct PageController {
    sessions: SessionStore,
    pipeline: Arc<EmbeddingPipeline>,
    model: Arc<dyn ChatModel>,
    rulebook: RwLock<Option<ActiveRulebook>>,
}

impl PageController {
    pub fn new(pipeline: Arc<EmbeddingPipeline>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            sessions: SessionStore::new(),
            pipeline,
            model,
            rulebook: RwLock::new(None),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn pipeline(&self) -> &Arc<EmbeddingPipeline> {
        &self.pipeline
    }

    pub fn render(&self, session: &Session) -> PageView {
        let history = session.read_all();
        let messages = if history.is_empty() {
            vec![ChatMessage::ai(GREETING)]
        } else {
            history
        };
        PageView {
            session_id: session.id().to_string(),
            title: TITLE,
            stats: session.stat_tracks(),
            scene: None,
            messages,
        }
    }

    /// Validate a question, make sure the rulebook is prepared and record the human message.
    pub async fn start_turn(&self, session: &Session, question: &str) -> Result<PendingTurn, PageError> {
        if question.trim().is_empty() {
            return Err(PageError::InvalidInput("message must not be empty".to_string()));
        }
        let guard = session.begin_generation().ok_or(PageError::Busy)?;

        let document = self
            .rulebook
            .read()
            .as_ref()
            .map(|active| Arc::clone(&active.document))
            .ok_or(PageError::NoRulebook)?;
        let retriever = self.pipeline.prepare(&document).await?;

        session.append(ChatMessage::human(question));
        debug!(session = %session.id(), rulebook = %document.name, "Turn started");

        Ok(PendingTurn {
            session: session.clone(),
            question: question.to_string(),
            retriever,
            model: Arc::clone(&self.model),
            _guard: guard,
        })
    }

    pub async fn submit<D: DisplaySink>(
        &self,
        session: &Session,
        question: &str,
        display: D,
    ) -> Result<ChatMessage, PageError> {
        self.start_turn(session, question).await?.run(display).await
    }

    /// Prepare `document` and make it the active rulebook.
    pub async fn upload_rulebook(&self, document: Document) -> Result<RulebookInfo, PageError> {
        let retriever = self.pipeline.prepare(&document).await?;
        let info = RulebookInfo {
            name: document.name.clone(),
            chunks: retriever.chunk_count(),
            prepared_at: Utc::now(),
        };
        info!(rulebook = %info.name, chunks = info.chunks, "Rulebook activated");
        *self.rulebook.write() = Some(ActiveRulebook {
            document: Arc::new(document),
            info: info.clone(),
        });
        Ok(info)
    }

    pub async fn load_rulebook_from_path(&self, path: &Path) -> Result<RulebookInfo, PageError> {
        let document = Document::from_path(path)?;
        self.upload_rulebook(document).await
    }

    pub fn rulebook_info(&self) -> Option<RulebookInfo> {
        self.rulebook.read().as_ref().map(|active| active.info.clone())
    }
}

/// A turn whose human message is recorded and which still needs its answer.
/// Holds the session's generation flag until dropped.
pub struct PendingTurn {
    session: Session,
    question: String,
    retriever: Arc<Retriever>,
    model: Arc<dyn ChatModel>,
    _guard: GenerationGuard,
}

impl PendingTurn {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn run<D: DisplaySink>(self, display: D) -> Result<ChatMessage, PageError> {
        let chunks = self.retriever.retrieve(&self.question).await?;
        let context = format_docs(&chunks);
        let prompt = assemble(&context, &self.question);
        debug!(
            session = %self.session.id(),
            chunks = chunks.len(),
            model = %self.model.model_name(),
            rulebook = %self.retriever.document_name(),
            "Prompt assembled"
        );

        let tokens = self.model.stream(&prompt).await.map_err(ChatError::from)?;
        let mut sink = ChatCallbackSink::new(self.session.clone(), display);
        let message = stream_into(tokens, &mut sink).await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::NullDisplay;
    use crate::chunker::CharacterTextSplitter;
    use crate::embedder::HashEmbeddings;
    use crate::llm::{LLMError, TokenStream};
    use crate::path_manager::PathManager;
    use crate::pipeline::DEFAULT_TOP_K;
    use crate::prompt::ChatPrompt;
    use crate::session::Role;
    use futures_util::stream;

    struct EchoModel;

    #[async_trait::async_trait]
    impl ChatModel for EchoModel {
        async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream, LLMError> {
            let answer = format!("You asked: {}", prompt.question().unwrap_or_default());
            Ok(Box::pin(stream::iter(vec![Ok(answer)])))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn controller(dir: &Path) -> PageController {
        let pipeline = EmbeddingPipeline::new(
            PathManager::with_base(dir).unwrap(),
            CharacterTextSplitter::default(),
            Arc::new(HashEmbeddings::new(64)),
            DEFAULT_TOP_K,
        );
        PageController::new(Arc::new(pipeline), Arc::new(EchoModel))
    }

    #[test]
    fn test_render_shows_greeting_without_saving_it() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let session = controller.sessions().create();

        let view = controller.render(&session);
        assert_eq!(view.title, "TRPG");
        assert_eq!(view.session_id, session.id());
        assert_eq!(view.messages, vec![ChatMessage::ai(GREETING)]);
        assert!(view.scene.is_none());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_rulebook() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let session = controller.sessions().create();

        let err = controller.submit(&session, "hi", NullDisplay).await.unwrap_err();
        assert!(matches!(err, PageError::NoRulebook));
        assert!(session.is_empty());
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let session = controller.sessions().create();
        let err = controller.submit(&session, "   ", NullDisplay).await.unwrap_err();
        assert!(matches!(err, PageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_turn_appends_human_then_ai() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let doc = Document::new("rules.txt", b"Each player starts with 3 coins.".to_vec()).unwrap();
        let info = controller.upload_rulebook(doc).await.unwrap();
        assert_eq!(info.name, "rules.txt");
        assert_eq!(info.chunks, 1);
        assert_eq!(controller.rulebook_info().map(|i| i.name), Some("rules.txt".into()));

        let session = controller.sessions().create();
        let reply = controller
            .submit(&session, "How many coins?", NullDisplay)
            .await
            .unwrap();
        assert_eq!(reply.text, "You asked: How many coins?");

        let roles: Vec<Role> = session.read_all().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Human, Role::Ai]);
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_second_turn_while_pending_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        controller
            .upload_rulebook(Document::new("rules.txt", b"rules".to_vec()).unwrap())
            .await
            .unwrap();
        let session = controller.sessions().create();

        let pending = controller.start_turn(&session, "first").await.unwrap();
        let err = controller.start_turn(&session, "second").await.err().unwrap();
        assert!(matches!(err, PageError::Busy));

        pending.run(NullDisplay).await.unwrap();
        assert_eq!(session.len(), 2);
        assert!(controller.start_turn(&session, "third").await.is_ok());
    }
}
