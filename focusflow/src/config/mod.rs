//! Configuration sections owned by the sharing core.
//!
//! The core does not parse command lines. It owns the `[realtime]`,
//! `[activity]`, `[sharing]` and `[assistant]` sections of the TOML file;
//! a host binary flattens [`CoreConfigFile`] into its own file struct, puts
//! its CLI and environment layers on top and calls [`CoreConfig::resolve`].
//!
//! Priority (highest first): CLI, environment, TOML file, compiled defaults.
//! A missing default file is not an error; an explicit path that does not
//! exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::assistant::DEFAULT_HISTORY_LIMIT;
use crate::backend::memory::DEFAULT_FEED_CAPACITY;
use crate::realtime::DEFAULT_MAX_DEDUP_TRACKING;

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

/// The core's sections of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfigFile {
    realtime: RealtimeFileConfig,
    activity: ActivityFileConfig,
    sharing: SharingFileConfig,
    assistant: AssistantFileConfig,
}

/// `[realtime]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RealtimeFileConfig {
    feed_capacity: Option<usize>,
    max_dedup_tracking: Option<usize>,
}

/// `[activity]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActivityFileConfig {
    retry_interval_secs: Option<u64>,
    warning_buffer: Option<usize>,
}

/// `[sharing]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SharingFileConfig {
    request_timeout_secs: Option<u64>,
}

/// `[assistant]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssistantFileConfig {
    history_limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Notifications buffered per change-feed subscriber before a gap.
    pub feed_capacity: usize,
    /// Tombstones remembered per live view before the set is reset.
    pub max_dedup_tracking: usize,
    /// How often queued activity records are retried.
    pub activity_retry_interval: Duration,
    /// Activity warnings buffered for the UI.
    pub activity_warning_buffer: usize,
    /// Upper bound on every view-layer store call.
    pub request_timeout: Duration,
    /// Earlier chat messages passed to the generator.
    pub history_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            feed_capacity: DEFAULT_FEED_CAPACITY,
            max_dedup_tracking: DEFAULT_MAX_DEDUP_TRACKING,
            activity_retry_interval: Duration::from_secs(30),
            activity_warning_buffer: 64,
            request_timeout: Duration::from_secs(15),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl CoreConfig {
    /// Resolves the core sections of a parsed file over the defaults.
    #[must_use]
    pub fn resolve(file: &CoreConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            feed_capacity: file
                .realtime
                .feed_capacity
                .unwrap_or(defaults.feed_capacity),
            max_dedup_tracking: file
                .realtime
                .max_dedup_tracking
                .unwrap_or(defaults.max_dedup_tracking),
            activity_retry_interval: file
                .activity
                .retry_interval_secs
                .map_or(defaults.activity_retry_interval, Duration::from_secs),
            activity_warning_buffer: file
                .activity
                .warning_buffer
                .unwrap_or(defaults.activity_warning_buffer),
            request_timeout: file
                .sharing
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            history_limit: file
                .assistant
                .history_limit
                .unwrap_or(defaults.history_limit),
        }
    }
}

/// Default config file location: `<config dir>/focusflow/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("focusflow").join("config.toml"))
}

/// Loads and parses a TOML config file into `T`.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file yields `T::default()`.
///
/// # Errors
///
/// Returns [`ConfigError`] if a file exists but cannot be read or parsed,
/// or if an explicit path does not exist.
pub fn load_config_file<T: DeserializeOwned + Default>(
    explicit_path: Option<&Path>,
) -> Result<T, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(path) = default_config_path() else {
        // No config dir available: use defaults.
        return Ok(T::default());
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
