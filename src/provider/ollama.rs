//! Ollama HTTP API: tags listing and NDJSON chat streaming.

use super::framing::{fragment_stream, Frame, NdjsonDecoder};
use super::{
    assistant_style_messages, require_model, trim_base, ChatRequest, FragmentStream, Provider,
    WireMessage,
};
use crate::error::ChatError;
use crate::types::{ModelDescriptor, ProviderKind};
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};

const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    http: reqwest::Client,
    base: String,
}

impl OllamaProvider {
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        Self {
            http,
            base: trim_base(base),
        }
    }

    async fn fetch_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base))
            .send()
            .await?
            .error_for_status()?;
        let body: TagsResponse = resp.json().await?;
        Ok(body
            .models
            .into_iter()
            .map(|m| {
                let size = m
                    .details
                    .and_then(|d| d.parameter_size)
                    .unwrap_or_else(|| "Unknown size".to_string());
                ModelDescriptor {
                    id: m.name.clone(),
                    name: m.name,
                    provider: ProviderKind::Ollama,
                    description: Some(format!("Ollama Model - {size}")),
                    context_window: Some(DEFAULT_CONTEXT_WINDOW),
                }
            })
            .collect())
    }
}

impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn list_models(&self) -> BoxFuture<'_, Vec<ModelDescriptor>> {
        Box::pin(async move {
            match self.fetch_models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(base = %self.base, error = %e, "failed to list ollama models");
                    Vec::new()
                }
            }
        })
    }

    fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, ChatError> {
        require_model(&req)?;
        let body = OllamaChatRequest {
            model: &req.model,
            messages: assistant_style_messages(&req),
            stream: true,
        };
        let request = self.http.post(format!("{}/api/chat", self.base)).json(&body);
        Ok(fragment_stream(
            ProviderKind::Ollama,
            request,
            NdjsonDecoder::new(ProviderKind::Ollama, parse_line),
        ))
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A line may carry text and `done: true` together; the text comes first.
fn parse_line(line: &str) -> Result<Vec<Frame>, serde_json::Error> {
    let parsed: ChatLine = serde_json::from_str(line)?;
    let mut frames = Vec::with_capacity(2);
    if let Some(text) = parsed.message.and_then(|m| m.content) {
        frames.push(Frame::Text(text));
    }
    if parsed.done {
        frames.push(Frame::Done);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_line() {
        let f = parse_line(
            r#"{"model":"m","message":{"role":"assistant","content":"Hi"},"done":false}"#,
        );
        assert_eq!(f.unwrap(), vec![Frame::Text("Hi".into())]);
    }

    #[test]
    fn done_line() {
        let f = parse_line(
            r#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#,
        );
        assert_eq!(f.unwrap(), vec![Frame::Text(String::new()), Frame::Done]);
    }

    #[test]
    fn text_and_done_on_one_line() {
        let f = parse_line(r#"{"message":{"content":"bye"},"done":true}"#).unwrap();
        assert_eq!(f, vec![Frame::Text("bye".into()), Frame::Done]);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_line("{oops").is_err());
    }
}
