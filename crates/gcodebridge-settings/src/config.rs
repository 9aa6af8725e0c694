//! Configuration for GCodeBridge
//!
//! Supports JSON and TOML files. Every section and field is optional in the
//! file; anything left out takes its default.
//!
//! Configuration is organized into sections:
//! - Server settings (listen address)
//! - Connection settings (port, baud rate, reconnection)
//! - Bridge settings (timeouts and queue limits)
//! - Logging settings (level and output format)

use crate::error::{SettingsError, SettingsResult};
use gcodebridge_communication::{BridgeConfig, ConnectionParams};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the HTTP and WebSocket listener binds to
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Port name; `"auto"` or empty detects the controller
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Serial read timeout in milliseconds
    pub timeout_ms: u64,
    /// Reconnect automatically while disconnected
    pub auto_reconnect: bool,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_interval_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "auto".to_string(),
            baud_rate: 115200,
            timeout_ms: 50,
            auto_reconnect: true,
            reconnect_interval_ms: 5000,
        }
    }
}

/// Bridge timing and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Wait after the wake-up sequence before discarding startup output
    pub init_delay_ms: u64,
    /// Response timeout for line commands
    pub command_timeout_ms: u64,
    /// Response timeout for the homing cycle
    pub home_timeout_ms: u64,
    /// Wait for a status report
    pub status_timeout_ms: u64,
    /// Longest accepted command in bytes
    pub max_command_length: usize,
    /// Most requests waiting on the serial line at once
    pub queue_depth: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            init_delay_ms: 2000,
            command_timeout_ms: 5000,
            home_timeout_ms: 60_000,
            status_timeout_ms: 1000,
            max_command_length: 256,
            queue_depth: 32,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line human-readable output
    Compact,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
            Self::Compact => write!(f, "compact"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(SettingsError::invalid(
                "logging.format",
                format!("unknown format '{}'", other),
            )),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `gcodebridge=debug,tower_http=warn`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerSettings,
    /// Serial connection settings
    pub connection: ConnectionSettings,
    /// Bridge timing and limits
    pub bridge: BridgeSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Format::Json),
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("(none)").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let load_error = |reason: String| SettingsError::LoadError {
            path: path.display().to_string(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)
                .map_err(|e| load_error(format!("invalid JSON: {}", e)))?,
            Format::Toml => toml::from_str(&content)
                .map_err(|e| load_error(format!("invalid TOML: {}", e)))?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load config from `path`, or return defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let format = format_of(path)?;
        let save_error = |reason: String| SettingsError::SaveError {
            path: path.display().to_string(),
            reason,
        };

        let content = match format {
            Format::Json => {
                serde_json::to_string_pretty(self).map_err(|e| save_error(e.to_string()))?
            }
            Format::Toml => toml::to_string_pretty(self).map_err(|e| save_error(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| save_error(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        self.listen_addr()?;

        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.timeout_ms == 0 {
            return Err(SettingsError::invalid("connection.timeout_ms", "must be > 0"));
        }
        if self.connection.auto_reconnect && self.connection.reconnect_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.reconnect_interval_ms",
                "must be > 0 when auto_reconnect is enabled",
            ));
        }

        for (key, value) in [
            ("bridge.command_timeout_ms", self.bridge.command_timeout_ms),
            ("bridge.home_timeout_ms", self.bridge.home_timeout_ms),
            ("bridge.status_timeout_ms", self.bridge.status_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }
        if self.bridge.max_command_length == 0 {
            return Err(SettingsError::invalid("bridge.max_command_length", "must be > 0"));
        }
        if self.bridge.queue_depth == 0 {
            return Err(SettingsError::invalid("bridge.queue_depth", "must be > 0"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(SettingsError::invalid("logging.level", "must not be empty"));
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> SettingsResult<SocketAddr> {
        self.server
            .listen
            .trim()
            .parse()
            .map_err(|e| SettingsError::invalid("server.listen", format!("{}", e)))
    }

    /// Serial parameters for the bridge
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            port: self.connection.port.trim().to_string(),
            baud_rate: self.connection.baud_rate,
            timeout_ms: self.connection.timeout_ms,
            ..ConnectionParams::default()
        }
    }

    /// Bridge timing and limits
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            init_delay: Duration::from_millis(self.bridge.init_delay_ms),
            command_timeout: Duration::from_millis(self.bridge.command_timeout_ms),
            home_timeout: Duration::from_millis(self.bridge.home_timeout_ms),
            status_timeout: Duration::from_millis(self.bridge.status_timeout_ms),
            max_command_length: self.bridge.max_command_length,
            queue_depth: self.bridge.queue_depth,
            ..BridgeConfig::default()
        }
    }

    /// Reconnect interval, or `None` when auto-reconnect is off
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.connection
            .auto_reconnect
            .then(|| Duration::from_millis(self.connection.reconnect_interval_ms))
    }
}

/// Default location of the configuration file
///
/// `<config dir>/gcodebridge/config.toml`, e.g. `~/.config/gcodebridge/config.toml`
/// on Linux.
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("gcodebridge").join("config.toml"))
        .ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 5000);
        assert_eq!(config.connection.port, "auto");
        assert_eq!(config.reconnect_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB0"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB0");
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.bridge, BridgeSettings::default());
    }

    #[test]
    fn test_validation_errors_name_the_key() {
        let mut config = Config::default();
        config.server.listen = "localhost".to_string();
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { ref key, .. }) if key == "server.listen"
        ));

        let mut config = Config::default();
        config.bridge.queue_depth = 0;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { ref key, .. }) if key == "bridge.queue_depth"
        ));

        let mut config = Config::default();
        config.connection.auto_reconnect = false;
        config.connection.reconnect_interval_ms = 0;
        config.validate().unwrap();
        assert_eq!(config.reconnect_interval(), None);
    }

    #[test]
    fn test_empty_port_means_auto() {
        let config: Config = toml::from_str("[connection]\nport = \"\"\n").unwrap();
        config.validate().unwrap();
        assert!(config.connection_params().is_auto());

        let mut config = Config::default();
        config.connection.port = "   ".to_string();
        config.validate().unwrap();
        assert!(config.connection_params().is_auto());
    }

    #[test]
    fn test_conversions() {
        let mut config = Config::default();
        config.connection.port = " COM3 ".to_string();
        config.bridge.home_timeout_ms = 1234;

        let params = config.connection_params();
        assert_eq!(params.port, "COM3");
        assert_eq!(params.baud_rate, 115200);
        assert_eq!(params.timeout_ms, 50);

        let bridge = config.bridge_config();
        assert_eq!(bridge.home_timeout, Duration::from_millis(1234));
        assert_eq!(bridge.queue_depth, 32);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn test_default_config_path() {
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("gcodebridge/config.toml"));
        }
    }
}
