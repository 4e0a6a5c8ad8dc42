pub(crate) mod framing;

pub mod foundry;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod ollama;

use crate::error::ChatError;
use crate::types::{Attachment, Message, ModelDescriptor, ProviderKind, Role};
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use serde::Serialize;

/// Text fragments of one generation, in arrival order.
///
/// An `Err` item is always the last one: the adapter reports a failed
/// transport once and then ends the stream.
pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

/// One chat turn for an adapter: the transcript so far plus the per-call knobs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,

    /// Ends with the user message being answered.
    pub messages: Vec<Message>,
    pub attachments: Vec<Attachment>,
}

/// Capability every backend adapter implements.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Models offered by the backend. Never fails: any error yields an empty list.
    fn list_models(&self) -> BoxFuture<'_, Vec<ModelDescriptor>>;

    /// Validate `req` and return a lazy fragment stream.
    ///
    /// Only request validation fails here; the network is not touched until
    /// the stream is polled, and dropping it aborts the transport.
    fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, ChatError>;
}

/// `{role, content}` message used by the OpenAI and Ollama chat endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

pub(crate) fn assistant_style_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "assistant",
        Role::System => "system",
    }
}

/// System prompt first (when set), then the transcript with `model` spelled `assistant`.
pub(crate) fn assistant_style_messages(req: &ChatRequest) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(req.messages.len() + 1);
    if !req.system_prompt.trim().is_empty() {
        out.push(WireMessage {
            role: "system",
            content: req.system_prompt.clone(),
        });
    }
    out.extend(req.messages.iter().map(|m| WireMessage {
        role: assistant_style_role(m.role),
        content: m.content.clone(),
    }));
    out
}

pub(crate) fn require_model(req: &ChatRequest) -> Result<(), ChatError> {
    if req.model.trim().is_empty() {
        return Err(ChatError::Validation("no model selected".to_string()));
    }
    Ok(())
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}


#[cfg(test)]
mod tests {
    use super::test_support::msg;
    use super::*;

    fn req(system_prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            system_prompt: system_prompt.into(),
            messages: vec![
                msg(1, Role::User, "hi"),
                msg(2, Role::Model, "hello"),
                msg(3, Role::User, "again"),
            ],
            attachments: Vec::new(),
        }
    }

    #[test]
    fn system_prompt_goes_first_and_model_becomes_assistant() {
        let wire = assistant_style_messages(&req("be brief"));
        let roles: Vec<_> = wire.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(wire[0].content, "be brief");
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let wire = assistant_style_messages(&req("  "));
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn trim_base_strips_trailing_slashes() {
        assert_eq!(trim_base(" http://x:1/v1/ "), "http://x:1/v1");
    }
}
