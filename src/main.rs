use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{warn, Level};

mod actions;
mod app;
mod config;
mod error;
mod poller;
mod queue;
mod relay;
mod server;
mod tmux;

use actions::Action;
use app::App;
use config::RelayConfig;
use poller::Poller;
use relay::Relay;
use server::WebServer;
use tmux::{Payload, SpecialKey, TmuxRunner};

/// Remote control for tmux-hosted coding agents
#[derive(Debug, Parser)]
#[command(name = "muxrelay", version, about)]
struct Cli {
    #[command(flatten)]
    config: RelayConfig,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP control API (the default)
    Serve {
        /// Do not poll windows in the background; queues then only advance
        /// while a client reads output
        #[arg(long)]
        no_poller: bool,
    },
    /// Live dashboard of every window in this terminal
    Dashboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The dashboard owns the terminal, so only warnings get through there
    let level = match cli.command {
        Some(Command::Dashboard) => Level::WARN,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let markers = cli.config.load_markers()?;
    let runner = Arc::new(TmuxRunner::new(cli.config.tmux.clone(), cli.config.timeout()));
    let relay = Arc::new(
        Relay::new(&cli.config, runner, &markers).context("Invalid marker pattern")?,
    );

    match cli.command.unwrap_or(Command::Serve { no_poller: false }) {
        Command::Serve { no_poller } => serve(&cli.config, relay, !no_poller).await,
        Command::Dashboard => dashboard(&cli.config, relay).await,
    }
}

async fn serve(config: &RelayConfig, relay: Arc<Relay>, with_poller: bool) -> Result<()> {
    if let Err(e) = relay.ensure_default_session().await {
        warn!(session = %config.session, error = %e, "could not create default session");
    }

    if with_poller {
        Poller::new(relay.clone(), config.poll_interval()).spawn();
    }

    WebServer::new(config.bind, relay).start().await
}

async fn dashboard(config: &RelayConfig, relay: Arc<Relay>) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press {
                        let _ = input_tx.send(Action::KeyPress(key));
                    }
                }
            }
        }
    });

    // Spawn dashboard poller
    let poll_tx = tx.clone();
    let poll_relay = relay.clone();
    let interval = config.poll_interval();
    tokio::spawn(async move {
        loop {
            match poll_relay.dashboard().await {
                Ok(entries) => {
                    let _ = poll_tx.send(Action::DashboardUpdated(entries));
                }
                Err(e) => {
                    let _ = poll_tx.send(Action::Error(format!("tmux: {}", e)));
                }
            }
            tokio::time::sleep(interval).await;
        }
    });

    let mut app = App::new();

    // Main event loop
    let result = loop {
        terminal.draw(|f| app.render(f))?;

        for pending_action in app.take_pending_actions() {
            let outcome = match pending_action {
                Action::Attach(ref target) => {
                    // Suspend TUI and attach to the window
                    ratatui::restore();

                    let cmd = relay.client().attach_command(target);
                    let status = std::process::Command::new(&cmd[0])
                        .args(&cmd[1..])
                        .stdin(Stdio::inherit())
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit())
                        .status();

                    // Resume TUI
                    terminal = ratatui::init();

                    status
                        .map(|_| ())
                        .map_err(|e| format!("Failed to attach: {}", e))
                }
                Action::SendText(ref target, ref text) => relay
                    .send(target, &Payload::Text(text.clone()))
                    .await
                    .map_err(|e| format!("Send failed: {}", e)),
                Action::Interrupt(ref target) => relay
                    .send(target, &Payload::Key(SpecialKey::Interrupt))
                    .await
                    .map_err(|e| format!("Interrupt failed: {}", e)),
                Action::SetPlaying(ref target, playing) => {
                    relay.set_playing(target, playing);
                    Ok(())
                }
                Action::NewWindow(ref session) => relay
                    .create_window(session, None)
                    .await
                    .map(|_| ())
                    .map_err(|e| format!("Failed to create window: {}", e)),
                Action::CloseWindow(ref target) => relay
                    .close_window(target)
                    .await
                    .map_err(|e| format!("Failed to close: {}", e)),
                _ => Ok(()),
            };
            if let Err(msg) = outcome {
                app.status_message = Some(msg);
            }
        }

        tokio::select! {
            Some(action) = rx.recv() => {
                match app.handle_action(action) {
                    Ok(should_quit) => {
                        if should_quit {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
        }
    };

    // Restore terminal
    ratatui::restore();
    result
}
