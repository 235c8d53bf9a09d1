//! Line-oriented chat over the active session
//!
//! Every input line is sent as one message. Lines starting with `/` are
//! commands; see [`HELP`].

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use bluepack_core::{
    ConnectionEvent, ConnectionManager, PeerAddress, PeerDevice, SessionOrigin,
};

use crate::config::CliConfig;
use crate::error::{CliError, Result};

const HELP: &str = "\
Commands:
  /connect <address> [name]  dial a peer, replacing any current session
  /close                     close the current session and keep listening
  /state                     show the connection state and counters
  /help                      show this text
  /quit                      leave the chat
Anything else is sent to the connected peer.";

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// One parsed line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Send(String),
    Connect(PeerDevice),
    Close,
    State,
    Help,
    Quit,
    Empty,
}

/// Parse one line typed by the user
pub fn parse_input(line: &str) -> Result<ChatInput> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ChatInput::Empty);
    }
    if !trimmed.starts_with('/') {
        return Ok(ChatInput::Send(line.trim_end_matches(['\r', '\n']).to_string()));
    }

    let mut words = trimmed.split_whitespace();
    match words.next().unwrap_or_default() {
        "/quit" | "/exit" => Ok(ChatInput::Quit),
        "/close" => Ok(ChatInput::Close),
        "/state" => Ok(ChatInput::State),
        "/help" => Ok(ChatInput::Help),
        "/connect" => {
            let address: PeerAddress = words
                .next()
                .ok_or_else(|| CliError::InvalidInput("usage: /connect <address> [name]".into()))?
                .parse()?;
            let name: Vec<&str> = words.collect();
            let device = if name.is_empty() {
                PeerDevice::from_address(address)
            } else {
                PeerDevice::new(address.to_string(), name.join(" "), address)
            };
            Ok(ChatInput::Connect(device))
        }
        other => Err(CliError::InvalidInput(format!(
            "unknown command {}, try /help",
            other
        ))),
    }
}

/// Render a connection event for the terminal
pub fn describe_event(event: &ConnectionEvent) -> String {
    match event {
        ConnectionEvent::Listening { service } => format!("listening as {}", service),
        ConnectionEvent::ListenFailed { error } => format!("listener stopped: {}", error),
        ConnectionEvent::Connecting { attempt, peer } => {
            format!("connecting to {} (attempt {})", peer, attempt)
        }
        ConnectionEvent::Connected { peer, origin } => match origin {
            SessionOrigin::Accepted => format!("connected: {} dialed in", peer),
            SessionOrigin::Dialed(attempt) => {
                format!("connected to {} (attempt {})", peer, attempt)
            }
        },
        ConnectionEvent::DialFailed { attempt, error, .. } => {
            format!("attempt {} failed: {}", attempt, error)
        }
        ConnectionEvent::SessionEnded { peer, reason } => {
            format!("session with {} ended: {}", peer, reason)
        }
        ConnectionEvent::SendFailed { error } => format!("send failed: {}", error),
    }
}

// ----------------------------------------------------------------------------
// Chat Session
// ----------------------------------------------------------------------------

/// Interactive loop wiring a terminal to a [`ConnectionManager`]
pub struct ChatSession {
    manager: ConnectionManager,
    config: CliConfig,
}

impl ChatSession {
    pub fn new(manager: ConnectionManager, config: CliConfig) -> Self {
        Self { manager, config }
    }

    /// Chat on stdin until `/quit`, end of input or Ctrl+C
    pub async fn run(&self) -> Result<()> {
        println!("Type /help for commands.");
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Chat reading lines from `input`
    pub async fn run_with<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut events = self.manager.subscribe_events();
        let _subscription = self
            .manager
            .subscribe(|text: &str| println!("< {}", text));

        self.prompt();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("Input closed, leaving chat");
                        break;
                    };
                    match parse_input(&line) {
                        Ok(ChatInput::Quit) => break,
                        Ok(input) => self.handle_input(input).await?,
                        Err(e) => println!("! {}", e),
                    }
                    self.prompt();
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if self.config.show_events {
                            println!("* {}", describe_event(&event));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} connection events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_input(&self, input: ChatInput) -> Result<()> {
        match input {
            ChatInput::Send(text) => {
                if let Err(e) = self.manager.send_text(&text).await {
                    println!("! {}", e);
                }
            }
            ChatInput::Connect(peer) => {
                self.manager.connect_to(peer).await?;
            }
            ChatInput::Close => {
                if !self.manager.close().await? {
                    println!("! no session to close");
                }
            }
            ChatInput::State => {
                let stats = self.manager.stats().await?;
                println!("state: {}", self.manager.state());
                println!(
                    "sessions: {} established, {} replaced, {} stale discarded",
                    stats.sessions_established,
                    stats.sessions_replaced,
                    stats.stale_sessions_discarded
                );
                println!(
                    "dials: {} started, {} failed, {} cancelled",
                    stats.dials_started, stats.dials_failed, stats.dials_cancelled
                );
            }
            ChatInput::Help => println!("{}", HELP),
            ChatInput::Quit | ChatInput::Empty => {}
        }
        Ok(())
    }

    fn prompt(&self) {
        print!("{}", self.config.prompt);
        let _ = std::io::stdout().flush();
    }
}
