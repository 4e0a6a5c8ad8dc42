#![cfg(feature = "tui")]

use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use llmchat::{ChatClient, ProviderSettings, Role, Session};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

const HELP: &str = "Enter sends. Commands: /new, /next, /stop, /model <id>, /quit";

struct Ui {
    client: ChatClient,
    settings: ProviderSettings,
    model: String,
    input: String,
    notice: Option<String>,
}

pub async fn run_tui(
    client: ChatClient,
    settings: ProviderSettings,
    model_override: Option<String>,
) -> anyhow::Result<()> {
    let model = match model_override {
        Some(m) => m,
        None => client
            .list_models(&settings)
            .await
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_default(),
    };
    client.new_session(model.clone());

    let mut ui = Ui {
        client,
        settings,
        model,
        input: String::new(),
        notice: Some(HELP.to_string()),
    };

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ui) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    match handle_key(key, &mut ui).await {
                        Ok(true) => break Ok(()),
                        Ok(false) => {}
                        Err(e) => break Err(e),
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn current_session(ui: &Ui) -> Option<Session> {
    let store = ui.client.store();
    store.current().and_then(|id| store.session(id))
}

async fn handle_key(key: KeyEvent, ui: &mut Ui) -> anyhow::Result<bool> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Ok(true);
    }

    match key.code {
        KeyCode::Esc => {
            // Esc stops a running generation first; a second Esc quits.
            if let Some(s) = current_session(ui) {
                if ui.client.stop(s.id) {
                    ui.notice = Some("(stopped)".to_string());
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => {
            let msg = ui.input.trim().to_string();
            ui.input.clear();
            if msg.is_empty() {
                return Ok(false);
            }
            ui.notice = None;

            match msg.as_str() {
                "/quit" => return Ok(true),
                "/new" => {
                    ui.client.new_session(ui.model.clone());
                    return Ok(false);
                }
                "/next" => {
                    let store = ui.client.store();
                    let sessions = store.sessions();
                    if let Some(cur) = store.current() {
                        let pos = sessions.iter().position(|s| s.id == cur).unwrap_or(0);
                        let next = &sessions[(pos + 1) % sessions.len()];
                        store.set_current(next.id)?;
                    }
                    return Ok(false);
                }
                "/stop" => {
                    if let Some(s) = current_session(ui) {
                        if !ui.client.stop(s.id) {
                            ui.notice = Some("(nothing to stop)".to_string());
                        }
                    }
                    return Ok(false);
                }
                _ => {}
            }
            if let Some(rest) = msg.strip_prefix("/model ") {
                ui.model = rest.trim().to_string();
                ui.notice = Some(format!("model set to: {}", ui.model));
                return Ok(false);
            }

            let Some(session) = current_session(ui) else {
                return Ok(false);
            };
            if session.is_streaming() {
                ui.notice =
                    Some("(streaming in progress; /stop or wait for completion)".to_string());
                return Ok(false);
            }

            let model = (!ui.model.is_empty()).then_some(ui.model.as_str());
            match ui
                .client
                .send(session.id, &msg, Vec::new(), model, &ui.settings)
                .await
            {
                // The store receives the reply; the handle is not needed here.
                Ok(_handle) => {}
                Err(e) => ui.notice = Some(format!("Error: {e}")),
            }
        }
        _ => {}
    }

    Ok(false)
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, ui: &Ui) -> anyhow::Result<()> {
    let session = current_session(ui);
    let count = ui.client.store().sessions().len();

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        let mut title = format!(
            "llmchat [{}] model: {}",
            ui.settings.effective_provider(),
            ui.model
        );
        if let Some(s) = &session {
            title.push_str(&format!(" | {} ({count} chats)", s.title));
            for m in &s.messages {
                let (label, style) = match m.role {
                    Role::User => ("you", Style::default().add_modifier(Modifier::BOLD)),
                    Role::Model => ("model", Style::default()),
                    Role::System => ("system", Style::default().add_modifier(Modifier::ITALIC)),
                };
                text.lines.push(Line::styled(format!("{label}: "), style));
                if m.is_thinking && m.content.is_empty() {
                    text.lines.push(Line::from("…"));
                } else {
                    text.lines.extend(Text::from(m.content.clone()).lines);
                }
                text.lines.push(Line::from(""));
            }
        }
        if let Some(n) = &ui.notice {
            text.lines.push(Line::styled(n.clone(), Style::default().add_modifier(Modifier::DIM)));
        }

        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(ui.input.clone())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
