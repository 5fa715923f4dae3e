// src/prompt.rs
use serde::Serialize;

/// System turn of the rulebook prompt. `{context}` is replaced by the retrieved text.
pub const SYSTEM_TEMPLATE: &str = "Answer the question using ONLY the following context. If you don't know the answer just say you don't know. DON'T make anything up.

Context: {context}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    Human,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// A filled two-turn chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPrompt {
    pub messages: Vec<PromptMessage>,
}

impl ChatPrompt {
    pub fn system(&self) -> Option<&str> {
        self.content_of(PromptRole::System)
    }

    pub fn question(&self) -> Option<&str> {
        self.content_of(PromptRole::Human)
    }

    fn content_of(&self, role: PromptRole) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
    }
}

pub fn assemble(context: &str, question: &str) -> ChatPrompt {
    ChatPrompt {
        messages: vec![
            PromptMessage {
                role: PromptRole::System,
                content: SYSTEM_TEMPLATE.replace("{context}", context),
            },
            PromptMessage {
                role: PromptRole::Human,
                content: question.to_string(),
            },
        ],
    }
}
