//! TOML configuration for the `hid-setup` binary.
//!
//! Read from `--config <path>` when given, otherwise from the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\hid-setup\config.toml`
//! - Linux:    `~/.config/hid-setup/config.toml`
//! - macOS:    `~/Library/Application Support/hid-setup/config.toml`
//!
//! Every field is optional.  A missing file is the same as an empty one:
//!
//! ```toml
//! log_level = "info"
//! adb_path = "adb"
//! profile_dir = "/etc/hid-setup/profiles"
//!
//! [reconnect]
//! disconnect_settle_ms = 1000
//! services_settle_ms = 1000
//! prompt_wait_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::reconnect::ReconnectSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupConfig {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Program run to trigger the USB debugging prompt.
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,
    /// Directory of extra `*.toml` device profiles, layered over the
    /// built-in ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_dir: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Fixed waits of the reconnect procedure, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_settle_ms")]
    pub disconnect_settle_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub services_settle_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub prompt_wait_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}
fn default_settle_ms() -> u64 {
    1000
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            adb_path: default_adb_path(),
            profile_dir: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            disconnect_settle_ms: default_settle_ms(),
            services_settle_ms: default_settle_ms(),
            prompt_wait_ms: default_settle_ms(),
        }
    }
}

impl SetupConfig {
    /// Converts the `[reconnect]` table into supervisor settings.
    pub fn reconnect_settings(&self) -> ReconnectSettings {
        ReconnectSettings {
            disconnect_settle: Duration::from_millis(self.reconnect.disconnect_settle_ms),
            services_settle: Duration::from_millis(self.reconnect.services_settle_ms),
            prompt_wait: Duration::from_millis(self.reconnect.prompt_wait_ms),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the configuration from `path`, or from [`config_file_path`] when
/// `path` is `None`.
///
/// A missing file yields [`SetupConfig::default()`].  So does a missing
/// platform directory when no explicit path was given.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<SetupConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(SetupConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SetupConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Resolves the platform config directory including the `hid-setup`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("hid-setup"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hid-setup"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("hid-setup")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
