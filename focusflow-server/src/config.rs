//! Configuration system for the `FocusFlow` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/focusflow/config.toml`)
//! 4. Compiled defaults
//!
//! The file's `[server]` section belongs to this crate; the remaining
//! sections are the core library's and are resolved by
//! [`CoreConfig::resolve`].

use std::path::PathBuf;

use focusflow::config::{ConfigError, CoreConfig, CoreConfigFile, load_config_file};

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    #[serde(flatten)]
    core: CoreConfigFile,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "FocusFlow task sharing server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "FOCUSFLOW_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/focusflow/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "FOCUSFLOW_LOG")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Notifications buffered per feed subscriber before a gap is reported.
    #[arg(long)]
    pub feed_capacity: Option<usize>,

    /// Upper bound, in seconds, on view-layer store calls.
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8787`).
    pub bind_addr: String,
    /// Log level filter string.
    pub log_level: String,
    /// Log file, if logging to a file.
    pub log_file: Option<PathBuf>,
    /// Settings for the sharing core.
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8787".to_string(),
            log_level: "info".to_string(),
            log_file: None,
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file: ServerConfigFile = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();
        let mut core = CoreConfig::resolve(&file.core);
        if let Some(capacity) = cli.feed_capacity {
            core.feed_capacity = capacity;
        }
        if let Some(secs) = cli.request_timeout_secs {
            core.request_timeout = std::time::Duration::from_secs(secs);
        }

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli
                .log_file
                .clone()
                .or_else(|| file.server.log_file.clone()),
            core,
        }
    }
}
