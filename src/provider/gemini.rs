use super::framing::{fragment_stream, Frame, SseDecoder};
use super::{require_model, ChatRequest, FragmentStream, Provider};
use crate::error::ChatError;
use crate::types::{ModelDescriptor, ProviderKind, Role};
use futures_core::future::BoxFuture;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Used when the selected model id is not a Gemini model.
pub const FALLBACK_MODEL: &str = "gemini-2.5-flash";

const API_BASE: &str = "https://generativelanguage.googleapis.com/";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            api_key: api_key.into(),
            api_base: Url::parse(API_BASE)?,
        })
    }

    /// Point at a different API root (proxies, tests).
    pub fn with_api_base(mut self, base: &str) -> anyhow::Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        self.api_base = Url::parse(&base)?;
        Ok(self)
    }

    fn build_url(&self, model: &str) -> Result<Url, ChatError> {
        // v1beta:streamGenerateContent supports Server-Sent Events with alt=sse.
        // Docs: https://ai.google.dev/api/rest/v1beta/models/streamGenerateContent
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{model}:streamGenerateContent"))
            .map_err(|e| ChatError::Validation(format!("bad model id {model:?}: {e}")))?;

        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("alt", "sse");
        Ok(url)
    }
}

pub fn static_models() -> Vec<ModelDescriptor> {
    [
        ("gemini-2.5-flash", "Gemini 2.5 Flash"),
        ("gemini-2.5-flash-lite-latest", "Gemini 2.5 Flash Lite"),
        ("gemini-3-pro-preview", "Gemini 3.0 Pro"),
    ]
    .into_iter()
    .map(|(id, name)| ModelDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        provider: ProviderKind::Gemini,
        description: None,
        context_window: None,
    })
    .collect()
}

fn resolve_model(model: &str) -> &str {
    if model.contains("gemini") {
        model
    } else {
        FALLBACK_MODEL
    }
}

/// Cloud history: earlier turns plus the user turn being answered.
fn build_body(req: &ChatRequest) -> Result<StreamGenerateContentRequest, ChatError> {
    match req.messages.last() {
        Some(m) if m.role == Role::User => {}
        _ => {
            return Err(ChatError::Validation(
                "last message must be from user".to_string(),
            ))
        }
    }

    let contents = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| Content {
            role: Some(if m.role == Role::User { "user" } else { "model" }.to_string()),
            parts: vec![Part {
                text: Some(m.content.clone()),
            }],
        })
        .collect();

    let system_instruction = (!req.system_prompt.trim().is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: Some(req.system_prompt.clone()),
        }],
    });

    Ok(StreamGenerateContentRequest {
        system_instruction,
        contents,
    })
}

impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn list_models(&self) -> BoxFuture<'_, Vec<ModelDescriptor>> {
        Box::pin(async { static_models() })
    }

    fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, ChatError> {
        require_model(&req)?;
        let body = build_body(&req)?;
        let model = resolve_model(&req.model);
        let url = self.build_url(model)?;
        tracing::debug!(model, turns = body.contents.len(), "gemini request prepared");

        let request = self.http.post(url).json(&body);
        Ok(fragment_stream(
            ProviderKind::Gemini,
            request,
            SseDecoder::new(ProviderKind::Gemini, parse_event),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamGenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamGenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

fn parse_event(data: &str) -> Result<Vec<Frame>, serde_json::Error> {
    let r: StreamGenerateContentResponse = serde_json::from_str(data)?;
    Ok(extract_text(&r).map(Frame::Text).into_iter().collect())
}

fn extract_text(r: &StreamGenerateContentResponse) -> Option<String> {
    // Concatenate all text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}
