use clap::{Parser, Subcommand};
use llmchat::ProviderKind;

/// Chat with a local or cloud LLM.
#[derive(Debug, Parser)]
#[command(name = "llmchat")]
#[command(version)]
#[command(about = "Streaming chat client for Foundry Local, Ollama and Gemini", long_about = None)]
pub struct Args {
    /// Model id (default: config default_model, else the first listed model)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Provider: foundry, ollama or gemini (default: config active_provider)
    #[arg(short = 'p', long = "provider")]
    pub provider: Option<ProviderKind>,

    /// Base URL for the selected provider
    #[arg(long = "url")]
    pub url: Option<String>,

    /// Record a file name on the prompt (repeatable; not uploaded)
    #[arg(long = "attach", value_name = "NAME")]
    pub attach: Vec<String>,

    /// System prompt (empty string disables it)
    #[arg(long = "system-prompt")]
    pub system_prompt: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Health-check the selected provider's endpoint
    Probe {
        /// Timeout in milliseconds
        #[arg(long = "timeout-ms", default_value_t = 3000)]
        timeout_ms: u64,
    },

    /// List models offered by the selected provider
    Models,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
