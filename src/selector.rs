//! Provider selection policy.
//!
//! Settings are a per-call snapshot. Every selection builds a fresh adapter
//! from it, so a credential or URL from an earlier call never leaks into a
//! later one.

use crate::error::ChatError;
use crate::provider::foundry::FoundryProvider;
use crate::provider::ollama::OllamaProvider;
use crate::provider::Provider;
use crate::types::ProviderKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FOUNDRY_URL: &str = "http://127.0.0.1:8000/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// What the settings layer hands the core on each request. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub active_provider: ProviderKind,
    pub foundry_url: String,
    pub ollama_url: String,
    pub gemini_url: String,
    pub system_prompt: String,

    /// Route everything to the cloud provider regardless of `active_provider`.
    pub use_gemini_direct: bool,
    pub foundry_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            active_provider: ProviderKind::Foundry,
            foundry_url: DEFAULT_FOUNDRY_URL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            gemini_url: DEFAULT_GEMINI_URL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            use_gemini_direct: false,
            foundry_api_key: None,
            gemini_api_key: None,
        }
    }
}

impl ProviderSettings {
    pub fn effective_provider(&self) -> ProviderKind {
        if self.use_gemini_direct {
            ProviderKind::Gemini
        } else {
            self.active_provider
        }
    }

    pub fn endpoint(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Foundry => &self.foundry_url,
            ProviderKind::Ollama => &self.ollama_url,
            ProviderKind::Gemini => &self.gemini_url,
        }
    }
}

/// Adapter for the effective provider, talking to its configured endpoint.
pub fn select(
    http: &reqwest::Client,
    settings: &ProviderSettings,
) -> Result<Box<dyn Provider>, ChatError> {
    let kind = settings.effective_provider();
    build(http, settings, kind, settings.endpoint(kind))
}

/// Adapter for `kind` talking to `endpoint` (e.g. one returned by a probe).
pub fn build(
    http: &reqwest::Client,
    settings: &ProviderSettings,
    kind: ProviderKind,
    endpoint: &str,
) -> Result<Box<dyn Provider>, ChatError> {
    tracing::debug!(provider = %kind, endpoint, "selecting provider");
    match kind {
        ProviderKind::Foundry => Ok(Box::new(FoundryProvider::new(
            http.clone(),
            endpoint,
            settings.foundry_api_key.clone(),
        ))),
        ProviderKind::Ollama => Ok(Box::new(OllamaProvider::new(http.clone(), endpoint))),
        ProviderKind::Gemini => {
            #[cfg(feature = "gemini")]
            {
                use crate::provider::gemini::GeminiProvider;

                let Some(key) = settings
                    .gemini_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                else {
                    return Err(ChatError::Validation(
                        "no Gemini API key configured (set GEMINI_API_KEY or gemini_api_key)"
                            .to_string(),
                    ));
                };
                let p = GeminiProvider::new(http.clone(), key)
                    .and_then(|p| p.with_api_base(endpoint))
                    .map_err(|e| ChatError::Validation(format!("bad Gemini endpoint: {e:#}")))?;
                Ok(Box::new(p))
            }
            #[cfg(not(feature = "gemini"))]
            {
                let _ = (http, settings, endpoint);
                Err(ChatError::ProviderDisabled(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_direct_overrides_active_provider() {
        let mut s = ProviderSettings {
            active_provider: ProviderKind::Ollama,
            ..Default::default()
        };
        assert_eq!(s.effective_provider(), ProviderKind::Ollama);
        s.use_gemini_direct = true;
        assert_eq!(s.effective_provider(), ProviderKind::Gemini);
    }

    #[test]
    fn selects_adapter_for_active_provider() {
        let http = reqwest::Client::new();
        let s = ProviderSettings {
            active_provider: ProviderKind::Ollama,
            ..Default::default()
        };
        assert_eq!(select(&http, &s).unwrap().kind(), ProviderKind::Ollama);

        let s = ProviderSettings::default();
        assert_eq!(select(&http, &s).unwrap().kind(), ProviderKind::Foundry);
    }

    #[cfg(feature = "gemini")]
    #[test]
    fn gemini_requires_a_key() {
        let http = reqwest::Client::new();
        let mut s = ProviderSettings {
            use_gemini_direct: true,
            ..Default::default()
        };
        assert!(matches!(select(&http, &s), Err(ChatError::Validation(_))));

        s.gemini_api_key = Some("abc".into());
        assert_eq!(select(&http, &s).unwrap().kind(), ProviderKind::Gemini);
    }
}
