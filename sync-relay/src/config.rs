//! Configuration loading for clipsync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use sync_types::DEFAULT_ROOM;

/// Root configuration for clipsync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for HTTP + WebSocket (default: 0.0.0.0:8080).
    pub bind_address: String,
    /// Room used when a client connects without naming one.
    pub default_room: String,
    /// Path of the WebSocket endpoint (default: /ws).
    pub ws_path: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest signaling message relayed, in bytes (default: 64 KiB).
    pub max_message_bytes: usize,
    /// Maximum messages per connection per minute (default: 600).
    pub messages_per_minute: u32,
    /// Maximum messages per second across all connections (default: 1000).
    pub global_messages_per_second: u32,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            default_room: DEFAULT_ROOM.to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 64 * 1024,
            messages_per_minute: 600,
            global_messages_per_second: 1000,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.messages_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "limits.messages_per_minute must be > 0".into(),
            ));
        }
        if self.limits.global_messages_per_second == 0 {
            return Err(ConfigError::Invalid(
                "limits.global_messages_per_second must be > 0".into(),
            ));
        }
        if self.limits.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_message_bytes must be > 0".into(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.ws_path must start with '/': {:?}",
                self.server.ws_path
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.default_room, "default");
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.limits.max_message_bytes, 64 * 1024);
        assert!(config.http.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
default_room = "lobby"

[limits]
messages_per_minute = 60

[http]
metrics_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.server.default_room, "lobby");
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.limits.messages_per_minute, 60);
        assert_eq!(config.limits.global_messages_per_second, 1000);
        assert!(!config.http.metrics_enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.limits.messages_per_minute, 600);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config: Config = toml::from_str("[limits]\nmessages_per_minute = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ws_path_must_be_absolute() {
        let config: Config = toml::from_str("[server]\nws_path = \"ws\"").unwrap();
        assert!(config.validate().is_err());
    }

    // ===========================================
    // File Loading Tests
    // ===========================================

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"127.0.0.1:9999\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9999");
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind_address = ").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("relay.toml")).unwrap();
        assert_eq!(config.server.ws_path, "/ws");

        assert!(matches!(
            Config::from_file(&dir.path().join("relay.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
