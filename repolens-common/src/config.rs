//! Configuration loading for the daemon and client.
//!
//! Settings live in a single TOML file (`~/.config/repolens/config.toml` by
//! default, overridable per invocation). Every field has a default, so a
//! missing file or an empty file yields a fully usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_daemon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    7420
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_history_max_entries() -> usize {
    10_000
}

/// Bound on the classifier's in-memory history. Zero disables the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_history_max_entries(),
        }
    }
}

/// Client-side reconnect policy: fixed delay between attempts, capped count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_reconnect_attempts(),
            delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// Where the daemon listens and where the client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
        }
    }
}

impl DaemonConfig {
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }
}

/// Root configuration shared by the daemon and client binaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub reconnect: ReconnectConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Default on-disk location: `~/.config/repolens/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(base.join("repolens").join("config.toml"))
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from an explicit path. A missing file yields defaults; a present
    /// but malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.host.is_empty() {
            return Err(ConfigError::Invalid("daemon.host must not be empty".into()));
        }
        if self.reconnect.delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.delay_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.host, "127.0.0.1");
        assert_eq!(config.daemon.port, 7420);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay_ms, 2000);
        assert_eq!(config.history.max_entries, 10_000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon]\nport = 9000\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.daemon.port, 9000);
        assert_eq!(config.daemon.host, "127.0.0.1");
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "daemon = \"not a table\"").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_reconnect_delay_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reconnect]\ndelay_ms = 0\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_urls() {
        let daemon = DaemonConfig::default();
        assert_eq!(daemon.http_base_url(), "http://127.0.0.1:7420");
        assert_eq!(daemon.ws_url(), "ws://127.0.0.1:7420/ws");
    }
}
