// src/llm/openai.rs
// Streaming chat completions over server-sent events.

use super::{ChatModel, LLMError, TokenStream};
use crate::prompt::{ChatPrompt, PromptRole};
use eventsource_stream::Eventsource;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAIChatModel {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAIChatModel {
    pub fn new(api_key: String, base_url: String, model: String, temperature: f32) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            client: reqwest::Client::new(),
        }
    }
}

fn wire_role(role: PromptRole) -> &'static str {
    match role {
        PromptRole::System => "system",
        PromptRole::Human => "user",
    }
}

/// One SSE `data:` payload -> the token it carries, if any.
fn parse_chunk(data: &str) -> Result<Option<String>, LLMError> {
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| LLMError::InvalidResponse(format!("{}: {}", e, data)))?;
    if let Some(err) = chunk.error {
        return Err(LLMError::GenerationFailed(err.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

/// Turn a raw SSE byte stream into tokens, stopping at `[DONE]`.
pub fn sse_tokens<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = Box::pin(bytes.eventsource());
    // The first error ends the stream; a close without `[DONE]` is an error.
    let tokens = stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        loop {
            match events.next().await {
                Some(Ok(ev)) if ev.data.trim() == DONE_SENTINEL => return None,
                Some(Ok(ev)) => match parse_chunk(&ev.data) {
                    Ok(Some(token)) => return Some((Ok(token), Some(events))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(e)) => {
                    let err = LLMError::ConnectionFailed(format!("SSE stream error: {}", e));
                    return Some((Err(err), None));
                }
                None => {
                    warn!("Chat completion stream closed before [DONE]");
                    let err = LLMError::InvalidResponse(
                        "stream closed before [DONE]".to_string(),
                    );
                    return Some((Err(err), None));
                }
            }
        }
    });
    Box::pin(tokens)
}

#[async_trait::async_trait]
impl ChatModel for OpenAIChatModel {
    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream, LLMError> {
        debug!(model = %self.model, messages = prompt.messages.len(), "Starting chat completion stream");

        let url = format!("{}/chat/completions", self.base_url);
        let req = ChatCompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            stream: true,
            messages: prompt
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: wire_role(m.role),
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LLMError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Chat completion request rejected");
            return Err(LLMError::GenerationFailed(format!("{}: {}", status, body)));
        }

        Ok(sse_tokens(response.bytes_stream()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(frames: &[&str]) -> Vec<Result<String, std::io::Error>> {
        frames.iter().map(|f| Ok(format!("data: {}\n\n", f))).collect()
    }

    #[tokio::test]
    async fn test_tokens_until_done() {
        let frames = sse(&[
            r#"{"object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":" world"}}]}"#,
            "[DONE]",
            r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":"ignored"}}]}"#,
        ]);
        let tokens: Vec<_> = sse_tokens(stream::iter(frames)).collect().await;
        let tokens: Vec<String> = tokens.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(tokens, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let (a, b) = raw.split_at(17);
        let reads: Vec<Result<String, std::io::Error>> = vec![Ok(a.to_string()), Ok(b.to_string())];
        let tokens: Vec<_> = sse_tokens(stream::iter(reads)).collect().await;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].as_ref().unwrap(), "Hi");
    }

    #[tokio::test]
    async fn test_close_without_done_is_an_error() {
        let frames = sse(&[
            r#"{"choices":[{"delta":{"content":"Half an"}}]}"#,
        ]);
        let tokens: Vec<_> = sse_tokens(stream::iter(frames)).collect().await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].as_ref().unwrap(), "Half an");
        assert!(matches!(&tokens[1], Err(LLMError::InvalidResponse(msg)) if msg.contains("[DONE]")));
    }

    #[tokio::test]
    async fn test_error_payload_ends_stream() {
        let frames = sse(&[
            r#"{"choices":[{"delta":{"content":"A"}}]}"#,
            r#"{"error":{"message":"overloaded"}}"#,
            r#"{"choices":[{"delta":{"content":"B"}}]}"#,
            "[DONE]",
        ]);
        let tokens: Vec<_> = sse_tokens(stream::iter(frames)).collect().await;
        assert_eq!(tokens.len(), 2);
        assert!(matches!(&tokens[1], Err(LLMError::GenerationFailed(msg)) if msg == "overloaded"));
    }

    #[test]
    fn test_api_error_payload() {
        let err = parse_chunk(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert!(matches!(err, LLMError::GenerationFailed(msg) if msg == "quota exceeded"));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            parse_chunk("not json"),
            Err(LLMError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_roles_map_to_wire_names() {
        assert_eq!(wire_role(PromptRole::System), "system");
        assert_eq!(wire_role(PromptRole::Human), "user");
    }

    #[test]
    fn test_model_creation() {
        let model = OpenAIChatModel::new(
            "sk-test".to_string(),
            "https://api.openai.com/v1/".to_string(),
            "gpt-3.5-turbo".to_string(),
            0.1,
        );
        assert_eq!(model.model_name(), "gpt-3.5-turbo");
        assert_eq!(model.base_url, "https://api.openai.com/v1");
    }
}
