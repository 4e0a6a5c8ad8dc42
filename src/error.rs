use crate::types::{MessageId, ProviderKind, SessionId};
use thiserror::Error;

/// Errors raised by the chat core.
///
/// Only `Validation`, `Store` and `ProviderDisabled` ever reach a caller
/// directly. `Unreachable` is absorbed by probing and model listing.
/// `Protocol` describes a skipped stream payload and is only logged.
/// `StreamFailure` travels inside a fragment stream and ends up as inline
/// text in the transcript.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{provider} endpoint unreachable: {message}")]
    Unreachable {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} sent a malformed response: {message}")]
    Protocol {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} stream failed: {message}")]
    StreamFailure {
        provider: ProviderKind,
        message: String,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} provider is not enabled in this build")]
    ProviderDisabled(ProviderKind),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub(crate) fn stream(provider: ProviderKind, message: impl std::fmt::Display) -> Self {
        ChatError::StreamFailure {
            provider,
            message: message.to_string(),
        }
    }

    pub(crate) fn protocol(provider: ProviderKind, message: impl std::fmt::Display) -> Self {
        ChatError::Protocol {
            provider,
            message: message.to_string(),
        }
    }

    /// Text appended to the in-progress message when a stream fails.
    pub fn diagnostic(&self) -> String {
        format!("\n\n[Error: {self}]")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("unknown message {message} in session {session}")]
    UnknownMessage {
        session: SessionId,
        message: MessageId,
    },

    #[error("session {0} already has a generation in flight")]
    AlreadyStreaming(SessionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_names_provider() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = ChatError::protocol(ProviderKind::Ollama, &parse);
        assert!(matches!(err, ChatError::Protocol { provider: ProviderKind::Ollama, .. }));
        assert_eq!(err.to_string(), format!("ollama sent a malformed response: {parse}"));
    }

    #[test]
    fn diagnostic_is_inline_error_text() {
        let err = ChatError::stream(ProviderKind::Foundry, "HTTP 500");
        assert_eq!(err.diagnostic(), "\n\n[Error: foundry stream failed: HTTP 500]");
    }
}
