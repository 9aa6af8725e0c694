//! GCodeBridge Settings Crate
//!
//! Loads, validates, and saves the bridge configuration file.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, BridgeSettings, Config, ConnectionSettings, LogFormat, LoggingSettings,
    ServerSettings,
};
pub use error::{SettingsError, SettingsResult};
