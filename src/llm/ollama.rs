// src/llm/ollama.rs
// Ollama /api/chat with newline-delimited JSON streaming.

use super::{ChatModel, LLMError, TokenStream};
use crate::prompt::{ChatPrompt, PromptRole};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Ollama-based chat model
pub struct OllamaChatModel {
    url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaFrame {
    #[serde(default)]
    message: Option<OllamaFrameMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaFrameMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatModel {
    pub fn new(url: String, model: String, temperature: f32) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            model,
            temperature,
            client: reqwest::Client::new(),
        }
    }
}

/// Parsed line: the token text and whether generation is finished.
fn parse_line(line: &[u8]) -> Result<Option<(String, bool)>, LLMError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let frame: OllamaFrame = serde_json::from_str(text)
        .map_err(|e| LLMError::InvalidResponse(format!("{}: {}", e, text)))?;
    if let Some(err) = frame.error {
        return Err(LLMError::GenerationFailed(err));
    }
    let content = frame.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((content, frame.done)))
}

struct LineReader<S> {
    bytes: S,
    buf: Vec<u8>,
    finished: bool,
}

/// Turn an NDJSON byte stream into tokens, stopping at the `done` frame.
pub fn ndjson_tokens<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let reader = LineReader {
        bytes,
        buf: Vec::new(),
        finished: false,
    };

    let tokens = stream::unfold(reader, |mut reader| async move {
        if reader.finished {
            return None;
        }
        loop {
            if let Some(pos) = reader.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buf.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(None) => continue,
                    Ok(Some((content, done))) => {
                        reader.finished = done;
                        if content.is_empty() {
                            if done {
                                return None;
                            }
                            continue;
                        }
                        return Some((Ok(content), reader));
                    }
                    Err(e) => {
                        reader.finished = true;
                        return Some((Err(e), reader));
                    }
                }
            }

            match reader.bytes.next().await {
                Some(Ok(chunk)) => reader.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.finished = true;
                    return Some((Err(LLMError::ConnectionFailed(e.to_string())), reader));
                }
                None => {
                    reader.finished = true;
                    let rest = std::mem::take(&mut reader.buf);
                    return match parse_line(&rest) {
                        Ok(Some((content, true))) if !content.is_empty() => Some((Ok(content), reader)),
                        Ok(Some((_, true))) => None,
                        Ok(_) => Some((
                            Err(LLMError::InvalidResponse(
                                "stream closed before the done frame".to_string(),
                            )),
                            reader,
                        )),
                        Err(e) => Some((Err(e), reader)),
                    };
                }
            }
        }
    });
    Box::pin(tokens)
}

#[async_trait::async_trait]
impl ChatModel for OllamaChatModel {
    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream, LLMError> {
        debug!(model = %self.model, messages = prompt.messages.len(), "Starting Ollama chat stream");

        let url = format!("{}/api/chat", self.url);
        let req = OllamaChatRequest {
            model: &self.model,
            messages: prompt
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: match m.role {
                        PromptRole::System => "system",
                        PromptRole::Human => "user",
                    },
                    content: &m.content,
                })
                .collect(),
            stream: true,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self.client.post(&url).json(&req).send().await.map_err(|e| {
            warn!("Failed to reach Ollama at {}. Make sure it's running: ollama serve", self.url);
            LLMError::ConnectionFailed(format!("Cannot reach Ollama at {}: {}", self.url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::GenerationFailed(format!("{}: {}", status, body)));
        }

        Ok(ndjson_tokens(response.bytes_stream().boxed()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reads(parts: &[&str]) -> stream::Iter<std::vec::IntoIter<Result<String, std::io::Error>>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.to_string()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect_ok(tokens: TokenStream) -> Vec<String> {
        tokens.map(|t| t.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_tokens_until_done() {
        let body = reads(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" world\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"late\"},\"done\":false}\n",
        ]);
        assert_eq!(collect_ok(ndjson_tokens(body)).await, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let body = reads(&[
            "{\"message\":{\"content\":\"Hel",
            "lo\"},\"done\":false}\n{\"message\":{\"content\":\"!\"},",
            "\"done\":true}",
        ]);
        assert_eq!(collect_ok(ndjson_tokens(body)).await, vec!["Hello", "!"]);
    }

    #[tokio::test]
    async fn test_close_without_done_frame_is_an_error() {
        let body = reads(&["{\"message\":{\"content\":\"Half\"},\"done\":false}\n"]);
        let tokens: Vec<_> = ndjson_tokens(body).collect().await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].as_ref().unwrap(), "Half");
        assert!(matches!(&tokens[1], Err(LLMError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_error_frame() {
        let body = reads(&["{\"error\":\"model not found\"}\n"]);
        let tokens: Vec<_> = ndjson_tokens(body).collect().await;
        assert_eq!(tokens.len(), 1);
        assert!(matches!(&tokens[0], Err(LLMError::GenerationFailed(msg)) if msg == "model not found"));
    }

    #[test]
    fn test_model_creation() {
        let model = OllamaChatModel::new(
            "http://localhost:11434/".to_string(),
            "llama3".to_string(),
            0.1,
        );
        assert_eq!(model.model_name(), "llama3");
        assert_eq!(model.url, "http://localhost:11434");
    }
}
