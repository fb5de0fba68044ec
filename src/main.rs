//! fleetwatch: a live bus-fleet dashboard for the terminal.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  FeedEvent   ┌──────────┐  draw()  ┌──────────┐
//! │ feed.rs  │ ───────────► │  app.rs  │ ───────► │  ui.rs   │
//! │ (driver) │ (broadcast)  │ (state)  │          │ (render) │
//! └──────────┘              └──────────┘          └──────────┘
//!      ▲  ▲                      ▲
//!      │  │ LinkSignal           │ handle_key_event()
//!      │  └─ connectivity.rs     │
//!      │                    ┌──────────┐
//!      └─ refresh_now() ─── │ input.rs │
//!                           └──────────┘
//! ```
//!
//! * **`source/`**: the `Transport` trait, the HTTP client and position
//!   validation.
//! * **`feed`**: polls the API on a timer with backoff and reconnection.
//! * **`retry`**: the backoff policy and retry helper.
//! * **`connectivity`**: online/offline signals from the host.
//! * **`session`**: bearer token handling and login.
//! * **`config`**: environment configuration.
//! * **`app`** / **`ui`** / **`input`**: view state, rendering and keys.
//! * **`main`**: wires everything together and runs the event loop.

mod app;
mod config;
mod connectivity;
mod error;
mod feed;
mod input;
mod retry;
mod session;
mod source;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;
use connectivity::{ConnectivityMonitor, LinkSignal};
use error::FeedError;
use feed::{FeedEvent, LiveLocationFeed, Severity};
use input::Action;
use session::Session;
use source::HttpTransport;

// ---------------------------------------------------------------------------
// RAII terminal guard
// ---------------------------------------------------------------------------

/// Manages terminal raw-mode and alternate-screen lifetime via [`Drop`].
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Restore the terminal before the default panic output is printed.
fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));
}

/// Send tracing output to a file; stdout belongs to the TUI.
fn init_logging(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetwatch=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();

    let config = Config::from_env();
    init_logging(&config.log_file)?;
    tracing::info!(api_url = %config.api_url, "starting fleetwatch");

    // -- session and transport -----------------------------------------------
    let session = Arc::new(Session::new(config.token.clone()));
    let transport = Arc::new(
        HttpTransport::new(&config.api_url, config.request_timeout, Arc::clone(&session) as _)
            .context("building HTTP client")?,
    );

    let mut app = App::new();

    if let Some(login) = &config.login {
        match transport.login(&login.email, &login.password).await {
            Ok(token) => {
                tracing::info!(email = %login.email, "logged in");
                session.set_token(token);
            }
            Err(err) => {
                tracing::warn!(%err, "login failed, continuing without a token");
                app.set_notice(session::describe_login_error(&err), Severity::Error);
            }
        }
    }

    // -- live feed ------------------------------------------------------------
    let monitor = ConnectivityMonitor::new();
    let mut feed = LiveLocationFeed::new(transport, monitor.clone(), config.feed);
    let mut events = feed.subscribe();
    feed.start().context("starting live feed")?;

    // -- terminal setup (RAII: Drop restores on exit or panic) ----------------
    let mut guard = TerminalGuard::new()?;

    // -- main event loop -----------------------------------------------------
    // Runs at ~10 fps (100 ms tick).  Each iteration:
    //   1. Drain any events from the feed.
    //   2. Render the UI.
    //   3. Poll for keyboard input (non-blocking, up to tick_rate).
    let tick_rate = Duration::from_millis(100);

    loop {
        // 1. Process feed events
        loop {
            match events.try_recv() {
                Ok(event) => app.apply(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "UI fell behind the feed, resyncing");
                    let snapshot = feed.snapshot();
                    app.apply(FeedEvent::ConnectionState(snapshot.state));
                    if let Some(at) = snapshot.last_fetch {
                        app.apply(FeedEvent::Positions {
                            positions: snapshot.positions,
                            at,
                        });
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        app.retry_attempt = feed.snapshot().retry_attempt;

        // 2. Render
        guard.terminal.draw(|f| ui::draw(&mut app, f))?;

        // 3. Handle input
        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                match input::handle_key_event(&mut app, key) {
                    Some(Action::Refresh) => match feed.refresh_now() {
                        // The feed reports both outcomes as notices.
                        Ok(()) | Err(FeedError::Offline) => {}
                        Err(err) => app.set_notice(err.to_string(), Severity::Error),
                    },
                    Some(Action::ToggleLink) => {
                        app.link_up = !app.link_up;
                        monitor.notify(if app.link_up {
                            LinkSignal::Online
                        } else {
                            LinkSignal::Offline
                        });
                    }
                    None => {}
                }
            }
        }

        if app.quit {
            break;
        }
    }

    feed.stop();
    tracing::info!("fleetwatch exiting");
    // `guard` is dropped here, restoring the terminal.
    Ok(())
}
