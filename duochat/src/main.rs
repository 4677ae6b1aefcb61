//! `DuoChat`: terminal client for two-party chat.
//!
//! Launches the TUI against a chat backend. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/duochat/config.toml`).
//!
//! ```bash
//! # Against a local duochat-server
//! cargo run --bin duochat
//!
//! # Against another backend
//! cargo run --bin duochat -- --api-url http://chat.example:8080 \
//!     --ws-url ws://chat.example:8080/ws
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use duochat::api::http::HttpApi;
use duochat::app::App;
use duochat::auth::TokenStore;
use duochat::config::{CliArgs, ClientConfig};
use duochat::connection::ws::WsConnector;
use duochat::session::{Client, SessionCommand, SessionEvent};
use duochat::ui;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // CLI args > env > config file > defaults.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file, never stdout: ratatui owns the terminal.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(api = %config.api_url, ws = %config.ws_url, "duochat starting");

    let api = HttpApi::new(&config.api_url, config.connect_timeout, config.request_timeout)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let connector = WsConnector::new(config.ws_url.clone(), config.channel_capacity);
    let store = TokenStore::new(config.token_path.clone());

    let (client, events) = Client::new(api, connector, store, config.session_config());
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
    let session_task = tokio::spawn(client.run(cmd_rx));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &config, &cmd_tx, events);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Shutdown keeps the stored token for the next start.
    let _ = cmd_tx.send(SessionCommand::Shutdown).await;
    if let Err(e) = session_task.await {
        tracing::warn!(err = %e, "session task ended abnormally");
    }

    tracing::info!("duochat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("duochat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Draw, drain session events, poll the keyboard. Runs on the main thread
/// while the session task runs on the runtime.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: &ClientConfig,
    cmd_tx: &mpsc::Sender<SessionCommand>,
    mut events: mpsc::Receiver<SessionEvent>,
) -> io::Result<()> {
    let mut app = App::new().with_timestamp_format(config.timestamp_format.clone());

    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        while let Ok(event) = events.try_recv() {
            app.apply_event(event);
        }

        if event::poll(config.poll_timeout)?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }

            if let Some(cmd) = app.handle_key_event(key) {
                match cmd_tx.try_send(cmd) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        app.notice = Some("Busy, try again".to_string());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        app.notice = Some("Session stopped".to_string());
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
