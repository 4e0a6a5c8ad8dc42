//! Local OpenAI-compatible server (Foundry Local and friends).

use super::framing::{fragment_stream, Frame, SseDecoder};
use super::{
    assistant_style_messages, require_model, trim_base, ChatRequest, FragmentStream, Provider,
    WireMessage,
};
use crate::error::ChatError;
use crate::types::{ModelDescriptor, ProviderKind};
use futures_core::future::BoxFuture;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

/// Key sent when the user configured none. Local servers accept anything.
pub const DEFAULT_API_KEY: &str = "local";

const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

#[derive(Debug, Clone)]
pub struct FoundryProvider {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl FoundryProvider {
    /// `base` is the OpenAI API root, usually ending in `/v1`.
    pub fn new(http: reqwest::Client, base: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base: trim_base(base),
            api_key: api_key
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    async fn fetch_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        let resp = self
            .http
            .get(format!("{}/models", self.base))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?;
        let body: ModelsResponse = resp.json().await?;
        let list = match body {
            ModelsResponse::Wrapped { data } => data,
            ModelsResponse::Bare(list) => list,
        };
        Ok(list
            .into_iter()
            .map(|m| ModelDescriptor {
                name: m.id.clone(),
                id: m.id,
                provider: ProviderKind::Foundry,
                description: Some("Local LLM".to_string()),
                context_window: Some(m.context_window.unwrap_or(DEFAULT_CONTEXT_WINDOW)),
            })
            .collect())
    }
}

impl Provider for FoundryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Foundry
    }

    fn list_models(&self) -> BoxFuture<'_, Vec<ModelDescriptor>> {
        Box::pin(async move {
            match self.fetch_models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(base = %self.base, error = %e, "failed to list foundry models");
                    Vec::new()
                }
            }
        })
    }

    fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, ChatError> {
        require_model(&req)?;
        let body = CompletionRequest {
            model: &req.model,
            messages: assistant_style_messages(&req),
            stream: true,
        };
        let request = self
            .http
            .post(format!("{}/chat/completions", self.base))
            .header(AUTHORIZATION, self.bearer())
            .json(&body);
        Ok(fragment_stream(
            ProviderKind::Foundry,
            request,
            SseDecoder::new(ProviderKind::Foundry, parse_chunk),
        ))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelsResponse {
    Wrapped { data: Vec<ModelEntry> },
    Bare(Vec<ModelEntry>),
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    context_window: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chunk(payload: &str) -> Result<Vec<Frame>, serde_json::Error> {
    if payload.trim() == "[DONE]" {
        return Ok(vec![Frame::Done]);
    }
    let chunk: CompletionChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .map(Frame::Text)
        .into_iter()
        .collect())
}
