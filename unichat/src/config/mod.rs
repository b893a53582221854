//! Configuration system for the `unichat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/unichat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::chat::ChatConfig;
use crate::chat::log::DEFAULT_FAILED_MARKER;
use crate::session::FileStore;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Host, port and path do not form a valid URL.
    #[error("invalid server address: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    client: ClientFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
    websocket_path: Option<String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[client]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientFileConfig {
    channel_capacity: Option<usize>,
    session_file: Option<PathBuf>,
    not_delivered_marker: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Chat server host name or address.
    pub host: String,
    /// Chat server port.
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub websocket_path: String,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,

    // -- Client --
    /// Capacity of the controller's internal queues.
    pub channel_capacity: usize,
    /// Where the session identity is stored (default: data dir).
    pub session_file: Option<PathBuf>,
    /// Text shown in place of a message that could not be sent.
    pub not_delivered_marker: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            websocket_path: "/websocket".to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            session_file: None,
            not_delivered_marker: DEFAULT_FAILED_MARKER.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/unichat/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.server.port).unwrap_or(defaults.port),
            websocket_path: file
                .server
                .websocket_path
                .clone()
                .unwrap_or(defaults.websocket_path),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .client
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            session_file: cli
                .session_file
                .clone()
                .or_else(|| file.client.session_file.clone()),
            not_delivered_marker: file
                .client
                .not_delivered_marker
                .clone()
                .unwrap_or(defaults.not_delivered_marker),
        }
    }

    /// Base URL of the REST API, `http://<host>:<port>/`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the host is not valid.
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&format!("http://{}:{}/", self.host, self.port))?)
    }

    /// URL of the WebSocket endpoint, `ws://<host>:<port><websocket_path>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the host or path is not valid.
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let base = Url::parse(&format!("ws://{}:{}/", self.host, self.port))?;
        Ok(base.join(self.websocket_path.trim_start_matches('/'))?)
    }

    /// Where the session identity is stored: the configured file, else
    /// `<data_dir>/unichat/session.toml`.
    #[must_use]
    pub fn session_path(&self) -> Option<PathBuf> {
        self.session_file.clone().or_else(FileStore::default_path)
    }

    /// Controller settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the WebSocket URL is not valid.
    pub fn chat_config(&self) -> Result<ChatConfig, ConfigError> {
        Ok(ChatConfig {
            websocket_url: self.websocket_url()?.to_string(),
            connect_timeout: self.connect_timeout,
            channel_capacity: self.channel_capacity,
            failed_marker: self.not_delivered_marker.clone(),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for the Team Unicorns group chat")]
pub struct CliArgs {
    /// Chat server host.
    #[arg(long, env = "UNICHAT_HOST")]
    pub host: Option<String>,

    /// Chat server port.
    #[arg(long, env = "UNICHAT_PORT")]
    pub port: Option<u16>,

    /// File that stores the logged-in identity.
    #[arg(long, env = "UNICHAT_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Path to config file (default: `~/.config/unichat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "UNICHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/unichat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("unichat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
