//! Configuration system for the `duochat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/duochat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::TokenStore;
use crate::connection::ReconnectPolicy;
use crate::session::SessionConfig;

/// Floor for `[reconnect] retry_delay_ms`; anything lower would spin on
/// dial attempts.
const MIN_RETRY_DELAY_MS: u64 = 100;

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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
    session: SessionFileConfig,
    ui: UiFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    retry_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    token_path: Option<PathBuf>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    poll_timeout_ms: Option<u64>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Base URL of the request/response API.
    pub api_url: String,
    /// WebSocket URL of the real-time channel.
    pub ws_url: String,
    /// Timeout for establishing HTTP and WebSocket connections.
    pub connect_timeout: Duration,
    /// Timeout for a whole HTTP request.
    pub request_timeout: Duration,
    /// Capacity of the command, event and link channels.
    pub channel_capacity: usize,

    // -- Reconnect --
    /// Retry policy after an abnormal channel close.
    pub reconnect: ReconnectPolicy,

    // -- Session --
    /// Where the session token is persisted.
    pub token_path: PathBuf,

    // -- UI --
    /// Poll timeout for the TUI event loop.
    pub poll_timeout: Duration,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
            token_path: default_token_path(),
            poll_timeout: Duration::from_millis(50),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/duochat/config.toml`) is tried and silently ignored if
    /// missing.
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
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let policy = defaults.reconnect.clone();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.network.api_url.clone())
                .unwrap_or(defaults.api_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.network.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .network
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity)
                .max(1),
            reconnect: ReconnectPolicy {
                retry_delay: file
                    .reconnect
                    .retry_delay_ms
                    .map_or(policy.retry_delay, |ms| {
                        Duration::from_millis(ms.max(MIN_RETRY_DELAY_MS))
                    }),
                backoff_multiplier: file
                    .reconnect
                    .backoff_multiplier
                    .unwrap_or(policy.backoff_multiplier),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(policy.max_delay, Duration::from_millis),
                max_attempts: file.reconnect.max_attempts.unwrap_or(policy.max_attempts),
            },
            token_path: cli
                .token_path
                .clone()
                .or_else(|| file.session.token_path.clone())
                .unwrap_or(defaults.token_path),
            poll_timeout: file
                .ui
                .poll_timeout_ms
                .map_or(defaults.poll_timeout, Duration::from_millis),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// The settings the background session task needs.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect: self.reconnect.clone(),
            connect_timeout: self.connect_timeout,
            event_capacity: self.channel_capacity,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for two-party chat")]
pub struct CliArgs {
    /// Base URL of the chat API.
    #[arg(long, env = "DUOCHAT_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the real-time channel.
    #[arg(long, env = "DUOCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Where to persist the session token.
    #[arg(long, env = "DUOCHAT_TOKEN_PATH")]
    pub token_path: Option<PathBuf>,

    /// Path to config file (default: `~/.config/duochat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DUOCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/duochat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_token_path() -> PathBuf {
    TokenStore::default_path().unwrap_or_else(|| std::env::temp_dir().join("duochat-token"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
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
    let path = config_dir.join("duochat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
