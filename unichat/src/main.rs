//! `unichat` — terminal client for the Team Unicorns group chat.
//!
//! Reads commands and messages line by line from stdin and prints the chat
//! as it changes. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/unichat/config.toml`).
//!
//! ```bash
//! cargo run --bin unichat -- --host chat.example.com --port 8080
//! ```
//!
//! Input:
//! - `/login <username> <password>`
//! - `/logout`
//! - `/quit`
//! - anything else is sent as a message

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use unichat::api::http::HttpChatApi;
use unichat::chat::log::{DeliveryStatus, Message};
use unichat::chat::{ChatController, ChatHandle, ChatView};
use unichat::config::{CliArgs, ClientConfig};
use unichat::session::{FileStore, KeyValueStore, MemoryStore, SessionStore};
use unichat::transport::ws::WsConnector;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    if log_guard.is_none() {
        eprintln!("Warning: unusable log file path, logging disabled");
    }
    tracing::info!(host = %config.host, port = config.port, "unichat starting");

    let base_url = config.api_base_url().map_err(io::Error::other)?;
    let chat_config = config.chat_config().map_err(io::Error::other)?;
    let api = HttpChatApi::new(base_url, config.request_timeout).map_err(io::Error::other)?;
    let store = open_session_store(&config);

    let (controller, handle, view_rx) = ChatController::new(
        Arc::new(api),
        SessionStore::new(store),
        Arc::new(WsConnector),
        chat_config,
    );
    let controller_task = tokio::spawn(controller.run());

    println!("unichat: /login <username> <password>, /logout, /quit");
    let result = run_repl(&handle, view_rx).await;

    let _ = handle.shutdown().await;
    let _ = controller_task.await;
    tracing::info!("unichat exiting");
    result
}

/// Sends `tracing` output to a log file.
///
/// Stdout carries the chat itself, so diagnostics go to `file` (default
/// `unichat.log` in the temp directory). `RUST_LOG` overrides `level`. The
/// returned guard flushes the background writer when dropped; `None` means
/// the path was unusable and logging is off.
fn init_logging(level: &str, file: Option<&Path>) -> Option<WorkerGuard> {
    let path = file.map_or_else(|| std::env::temp_dir().join("unichat.log"), Path::to_path_buf);
    let (dir, name) = split_log_path(&path)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .init();
    Some(guard)
}

/// Splits a log path into directory and file name. A bare file name lives
/// in the working directory.
fn split_log_path(path: &Path) -> Option<(&Path, &str)> {
    let name = path.file_name()?.to_str()?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some((dir, name))
}

/// Opens the session file, falling back to an in-memory store.
fn open_session_store(config: &ClientConfig) -> Arc<dyn KeyValueStore> {
    let Some(path) = config.session_path() else {
        tracing::warn!("no data directory, session will not persist");
        return Arc::new(MemoryStore::new());
    };
    match FileStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Warning: {e}; session will not persist");
            tracing::warn!(path = %path.display(), error = %e, "failed to open session file");
            Arc::new(MemoryStore::new())
        }
    }
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Login { username: String, password: String },
    Logout,
    Quit,
    Send(String),
    Usage(&'static str),
}

fn parse_input(line: &str) -> Option<Input> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut words = trimmed.split_whitespace();
    let input = match words.next() {
        Some("/login") => match (words.next(), words.next()) {
            (Some(username), Some(password)) => Input::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => Input::Usage("usage: /login <username> <password>"),
        },
        Some("/logout") => Input::Logout,
        Some("/quit" | "/exit") => Input::Quit,
        _ => Input::Send(line.to_string()),
    };
    Some(input)
}

async fn run_repl(
    handle: &ChatHandle,
    mut view_rx: tokio::sync::watch::Receiver<ChatView>,
) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut renderer = Renderer::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let sent = match parse_input(&line) {
                    None => Ok(()),
                    Some(Input::Quit) => return Ok(()),
                    Some(Input::Usage(usage)) => {
                        println!("{usage}");
                        Ok(())
                    }
                    Some(Input::Login { username, password }) => handle.login(username, password).await,
                    Some(Input::Logout) => handle.logout().await,
                    Some(Input::Send(text)) => handle.send(text).await,
                };
                if sent.is_err() {
                    return Ok(());
                }
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let view = view_rx.borrow_and_update().clone();
                renderer.render(&view);
            }
        }
    }
}

/// Prints what changed between successive views.
#[derive(Debug, Default)]
struct Renderer {
    status: String,
    error: Option<String>,
    printed: HashMap<String, (DeliveryStatus, String)>,
}

impl Renderer {
    fn render(&mut self, view: &ChatView) {
        let mut status = format!("[{}] [{}]", view.auth, view.connection);
        if view.loading_history {
            status.push_str(" loading messages...");
        }
        if view.login_pending {
            status.push_str(" logging in...");
        }
        if status != self.status {
            println!("{status}");
            self.status = status;
        }
        if view.error != self.error {
            if let Some(error) = &view.error {
                println!("! {error}");
            }
            self.error.clone_from(&view.error);
        }

        if view.messages.is_empty() {
            self.printed.clear();
        }
        for message in &view.messages {
            let key = (message.status, message.text.clone());
            if self.printed.get(&message.id) != Some(&key) {
                println!("{}", format_message(message));
                self.printed.insert(message.id.clone(), key);
            }
        }
    }
}

fn format_message(message: &Message) -> String {
    let time = message
        .timestamp
        .and_then(|ts| chrono::DateTime::from_timestamp_millis(ts.as_millis()))
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "--:--".to_string());
    let marker = match message.status {
        DeliveryStatus::Sending => " (sending)",
        DeliveryStatus::Delivered => "",
        DeliveryStatus::Failed => " (failed)",
    };
    format!("{time} {}: {}{marker}", message.author_name, message.text)
}
