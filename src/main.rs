mod cli;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use llmchat::config::Config;
use llmchat::{
    paths, Attachment, ChatClient, MessageId, ProviderSettings, SessionId, StoreEvent,
    StreamOutcome, TranscriptStore,
};
use std::io::Write;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = Config::load_optional(&config_path)?.unwrap_or_default();
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let settings = apply_overrides(cfg.provider_settings(), &args);
    let model = args.model.clone().or_else(|| cfg.default_model.clone());

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let client = ChatClient::new(http);

    match args.cmd {
        Some(cli::Command::Probe { timeout_ms }) => {
            let kind = settings.effective_provider();
            let url = settings.endpoint(kind).to_string();
            return match client.probe(&settings, Duration::from_millis(timeout_ms)).await {
                Some(ep) => {
                    println!("{kind}: {} ({:?})", ep.url, ep.reachability);
                    Ok(())
                }
                None => anyhow::bail!("{kind}: server at {url} is unreachable"),
            };
        }
        Some(cli::Command::Models) => {
            let models = client.list_models(&settings).await;
            if models.is_empty() {
                eprintln!("no models found for {}", settings.effective_provider());
            }
            for m in models {
                match m.description {
                    Some(d) => println!("{}\t{}", m.id, d),
                    None => println!("{}", m.id),
                }
            }
            return Ok(());
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(client, settings, model).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: llmchat \"Hello\" or `llmchat tui` (feature flag)");
    }

    let attachments = args.attach.iter().map(Attachment::file).collect();
    let session = client.new_session(model.clone().unwrap_or_default());
    let mut events = client.store().subscribe();
    let handle = client
        .send(session.id, &prompt, attachments, model.as_deref(), &settings)
        .await
        .context("failed to start generation")?;
    let target = handle.message_id();
    let canceller = handle.canceller();
    let mut done = Box::pin(handle.wait());

    let mut printed = 0;
    let outcome = loop {
        tokio::select! {
            outcome = &mut done => break outcome,
            _ = tokio::signal::ctrl_c() => {
                canceller.cancel();
            }
            ev = events.recv() => {
                if let Ok(StoreEvent::MessageUpdated { message, .. }) = ev {
                    if message == target {
                        print_new(client.store(), session.id, target, &mut printed);
                    }
                }
            }
        }
    };
    print_new(client.store(), session.id, target, &mut printed);
    println!();

    if outcome == StreamOutcome::Cancelled {
        eprintln!("(stopped)");
    }
    Ok(())
}

/// Print whatever the reply gained since the last call. Content only grows.
fn print_new(store: &TranscriptStore, session: SessionId, message: MessageId, printed: &mut usize) {
    let Some(m) = store.message(session, message) else {
        return;
    };
    if let Some(new) = m.content.get(*printed..) {
        print!("{new}");
        std::io::stdout().flush().ok();
    }
    *printed = m.content.len();
}

fn apply_overrides(mut settings: ProviderSettings, args: &cli::Args) -> ProviderSettings {
    if let Some(kind) = args.provider {
        settings.active_provider = kind;
        settings.use_gemini_direct = false;
    }
    if let Some(url) = &args.url {
        match settings.effective_provider() {
            llmchat::ProviderKind::Foundry => settings.foundry_url = url.clone(),
            llmchat::ProviderKind::Ollama => settings.ollama_url = url.clone(),
            llmchat::ProviderKind::Gemini => settings.gemini_url = url.clone(),
        }
    }
    if let Some(sp) = &args.system_prompt {
        settings.system_prompt = sp.clone();
    }
    settings
}
