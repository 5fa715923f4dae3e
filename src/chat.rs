// src/chat.rs
// Streaming callback sink: accumulates tokens, re-renders, persists on end.

use crate::llm::{LLMError, TokenStream};
use crate::session::{ChatMessage, Session};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Model(#[from] LLMError),
    #[error("Invalid callback transition: {event} while {state:?}")]
    InvalidTransition {
        event: &'static str,
        state: SinkState,
    },
}

/// Live view of the message currently being generated.
pub trait DisplaySink: Send {
    /// A fresh display slot for a new message.
    fn begin(&mut self) {}
    /// Show `text`, replacing whatever was shown before.
    fn render(&mut self, text: &str);
}

/// Records every render, in order.
impl DisplaySink for Vec<String> {
    fn render(&mut self, text: &str) {
        self.push(text.to_string());
    }
}

impl<D: DisplaySink + ?Sized> DisplaySink for &mut D {
    fn begin(&mut self) {
        (**self).begin();
    }

    fn render(&mut self, text: &str) {
        (**self).render(text);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn render(&mut self, _text: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Streaming,
    Finished,
}

pub struct ChatCallbackSink<D: DisplaySink> {
    session: Session,
    display: D,
    message: String,
    state: SinkState,
}

impl<D: DisplaySink> ChatCallbackSink<D> {
    pub fn new(session: Session, display: D) -> Self {
        Self {
            session,
            display,
            message: String::new(),
            state: SinkState::Idle,
        }
    }

    pub fn on_start(&mut self) -> Result<(), ChatError> {
        self.require(SinkState::Idle, "start")?;
        self.message.clear();
        self.display.begin();
        self.state = SinkState::Streaming;
        Ok(())
    }

    pub fn on_token(&mut self, token: &str) -> Result<(), ChatError> {
        self.require(SinkState::Streaming, "token")?;
        self.message.push_str(token);
        self.display.render(&self.message);
        Ok(())
    }

    /// Persist the accumulated text as one ai message.
    pub fn on_end(&mut self) -> Result<ChatMessage, ChatError> {
        self.require(SinkState::Streaming, "end")?;
        let message = ChatMessage::ai(std::mem::take(&mut self.message));
        self.session.append(message.clone());
        self.state = SinkState::Finished;
        debug!(session = %self.session.id(), chars = message.text.len(), "AI message saved");
        Ok(message)
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn into_display(self) -> D {
        self.display
    }

    fn require(&self, wanted: SinkState, event: &'static str) -> Result<(), ChatError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(ChatError::InvalidTransition {
                event,
                state: self.state,
            })
        }
    }
}

/// Drain `tokens` through `sink`. On a stream error nothing is persisted.
pub async fn stream_into<D: DisplaySink>(
    mut tokens: TokenStream,
    sink: &mut ChatCallbackSink<D>,
) -> Result<ChatMessage, ChatError> {
    sink.on_start()?;
    while let Some(token) = tokens.next().await {
        match token {
            Ok(token) => sink.on_token(&token)?,
            Err(e) => {
                warn!(error = %e, "Token stream failed");
                return Err(e.into());
            }
        }
    }
    sink.on_end()
}
