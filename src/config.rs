//! Configuration for tterm.
//!
//! The configuration file is located at `~/.tterm/config.toml`:
//!
//! ```toml
//! columns = 120
//! rows = 32
//! scrollback_limit = 5000
//! title = "tterm"
//!
//! [profile]
//! command = "bash"
//! args = ["-l"]
//! cwd = "/home/me"
//!
//! [profile.env]
//! TERM = "xterm-256color"
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::term::{TerminalSize, DEFAULT_SCROLLBACK_LIMIT};

/// Smallest terminal a host is expected to show
pub const MIN_COLUMNS: u16 = 52;
pub const MIN_ROWS: u16 = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Initial width in columns
    pub columns: u16,
    /// Initial height in rows
    pub rows: u16,
    /// Rows kept in the scroll-back store
    pub scrollback_limit: usize,
    /// Title used until the program sets one
    pub title: String,
    pub profile: Profile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            title: "tterm".to_string(),
            profile: Profile::default(),
        }
    }
}

/// What to run in a session
///
/// The engine does not spawn processes; the profile is carried for the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from `~/.tterm/config.toml`
    ///
    /// Falls back to the defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, content).map_err(write_err)
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".tterm").join("config.toml"))
    }

    /// Initial terminal size, never smaller than the host minimum
    pub fn terminal_size(&self) -> TerminalSize {
        TerminalSize::new(self.columns.max(MIN_COLUMNS), self.rows.max(MIN_ROWS))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
