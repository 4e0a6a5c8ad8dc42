use crate::selector::ProviderSettings;
use crate::types::ProviderKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// `foundry`, `ollama` or `gemini`.
    pub active_provider: Option<ProviderKind>,

    pub foundry_url: Option<String>,
    pub ollama_url: Option<String>,

    /// Override for the Gemini API root (proxies).
    pub gemini_url: Option<String>,

    pub system_prompt: Option<String>,
    pub use_gemini_direct: Option<bool>,

    /// Model used when a session has none selected.
    pub default_model: Option<String>,

    pub foundry_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Settings snapshot from this file plus `GEMINI_API_KEY` / `FOUNDRY_API_KEY`.
    pub fn provider_settings(&self) -> ProviderSettings {
        self.provider_settings_with(|k| std::env::var(k).ok())
    }

    pub(crate) fn provider_settings_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> ProviderSettings {
        let d = ProviderSettings::default();
        ProviderSettings {
            active_provider: self.active_provider.unwrap_or(d.active_provider),
            foundry_url: self.foundry_url.clone().unwrap_or(d.foundry_url),
            ollama_url: self.ollama_url.clone().unwrap_or(d.ollama_url),
            gemini_url: self.gemini_url.clone().unwrap_or(d.gemini_url),
            system_prompt: self.system_prompt.clone().unwrap_or(d.system_prompt),
            use_gemini_direct: self.use_gemini_direct.unwrap_or(d.use_gemini_direct),
            foundry_api_key: env("FOUNDRY_API_KEY").or_else(|| self.foundry_api_key.clone()),
            gemini_api_key: env("GEMINI_API_KEY").or_else(|| self.gemini_api_key.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{DEFAULT_FOUNDRY_URL, DEFAULT_SYSTEM_PROMPT};

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        let s = cfg.provider_settings_with(|_| None);
        assert_eq!(s.active_provider, ProviderKind::Foundry);
        assert_eq!(s.foundry_url, DEFAULT_FOUNDRY_URL);
        assert_eq!(s.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(!s.use_gemini_direct);
    }

    #[test]
    fn file_values_and_env_keys() {
        let cfg: Config = toml::from_str(
            r#"
            active_provider = "ollama"
            ollama_url = "http://10.0.0.2:11434"
            system_prompt = ""
            gemini_api_key = "from-file"
            "#,
        )
        .unwrap();
        let s = cfg
            .provider_settings_with(|k| (k == "GEMINI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(s.active_provider, ProviderKind::Ollama);
        assert_eq!(s.ollama_url, "http://10.0.0.2:11434");
        assert_eq!(s.system_prompt, "");
        assert_eq!(s.gemini_api_key.as_deref(), Some("from-env"));
        assert_eq!(s.foundry_api_key, None);
    }

    #[test]
    fn missing_file_is_none() {
        let path = std::env::temp_dir().join("llmchat-definitely-missing.toml");
        assert!(Config::load_optional(path).unwrap().is_none());
    }
}
