//! Streaming chat-completion client.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use voicewire_core::{ChatAgent, Conversation, ModelQuality, ServiceError};

use crate::{api_error, http_error, API_BASE};

fn model_for(quality: ModelQuality) -> &'static str {
    match quality {
        ModelQuality::FastCheap => "gpt-3.5-turbo",
        ModelQuality::SlowerSmarter => "gpt-4",
    }
}

pub struct OpenAiChatAgent {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiChatAgent {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'static str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the delta tokens from one SSE `data:` payload. `None` marks the
/// end-of-stream sentinel.
fn delta_tokens(data: &str) -> Option<Vec<String>> {
    if data == "[DONE]" {
        return None;
    }
    let tokens = match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .collect(),
        Err(err) => {
            tracing::debug!(%err, data = %data, "skipping undecodable stream chunk");
            Vec::new()
        }
    };
    Some(tokens)
}

#[async_trait]
impl ChatAgent for OpenAiChatAgent {
    async fn run_prompt(
        &self,
        quality: ModelQuality,
        conversation: Conversation,
        tokens: mpsc::Sender<String>,
    ) -> Result<(), ServiceError> {
        let model = model_for(quality);
        let request = ChatRequest {
            model,
            messages: conversation
                .messages
                .iter()
                .map(|message| ChatMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            temperature: 0.0,
            stream: true,
        };
        tracing::info!(
            prompt = %conversation.last_prompt(),
            model,
            temperature = 0.0,
            "executing chat request"
        );

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{API_BASE}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(http_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        // Server-sent events: "data: {json}\n\n" frames. Events can split
        // across network chunks, so carry the partial line over.
        let mut stream = response.bytes_stream();
        let mut carry = String::new();
        let mut full_reply = String::new();
        let mut first_token = true;

        'stream: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_error)?;
            carry.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = carry.find('\n') {
                let line = carry[..newline].trim().to_string();
                carry.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Some(parsed) = delta_tokens(data) else {
                    break 'stream;
                };
                for content in parsed {
                    if first_token {
                        tracing::debug!(
                            latency_ms = started.elapsed().as_millis() as u64,
                            "first chat token received"
                        );
                        first_token = false;
                    }
                    full_reply.push_str(&content);
                    if tokens.send(content).await.is_err() {
                        tracing::info!("token channel closed, abandoning stream");
                        return Ok(());
                    }
                }
            }
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply = %full_reply,
            "chat stream complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicewire_core::Role;

    #[test]
    fn model_selection() {
        assert_eq!(model_for(ModelQuality::FastCheap), "gpt-3.5-turbo");
        assert_eq!(model_for(ModelQuality::SlowerSmarter), "gpt-4");
    }

    #[test]
    fn request_serialization_shape() {
        let mut conversation = Conversation::new();
        conversation.add(Role::System, "be concise");
        conversation.add(Role::User, "hello");

        let request = ChatRequest {
            model: "gpt-4",
            messages: conversation
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: 0.0,
            stream: true,
        };
        let rendered = serde_json::to_string(&request).unwrap();
        assert!(rendered.contains(r#""model":"gpt-4""#));
        assert!(rendered.contains(r#""role":"system""#));
        assert!(rendered.contains(r#""stream":true"#));
        assert!(rendered.contains(r#""temperature":0.0"#));
    }

    #[test]
    fn delta_tokens_parses_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(delta_tokens(data), Some(vec!["Hel".to_string()]));
    }

    #[test]
    fn delta_tokens_handles_done_and_empty() {
        assert_eq!(delta_tokens("[DONE]"), None);
        // Role-only first chunk has no content.
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(delta_tokens(data), Some(vec![]));
    }

    #[test]
    fn delta_tokens_survives_garbage() {
        assert_eq!(delta_tokens("{ not json"), Some(vec![]));
    }
}
