//! # GCodeBridge
//!
//! A network-to-serial bridge for GRBL CNC controllers:
//! - forwards G-code commands received over HTTP to the controller's serial port
//! - answers each request with the controller's response (`ok`, `error:N`, `ALARM:N`)
//! - relays every line the controller prints to WebSocket subscribers
//!
//! ## Architecture
//!
//! GCodeBridge is organized as a workspace with multiple crates:
//!
//! 1. **gcodebridge-core** - Error types, event bus, coordinate types
//! 2. **gcodebridge-communication** - Serial ports, GRBL protocol, simulator, the serial bridge
//! 3. **gcodebridge-settings** - Configuration file loading and validation
//! 4. **gcodebridge-server** - HTTP routes and the WebSocket relay
//! 5. **gcodebridge** - Main binary that wires them together

pub use gcodebridge_communication::{
    list_ports, BridgeConfig, BridgeState, CommandReply, ConnectOptions, ConnectionParams,
    Controller, JogRequest, LinkOpener, RealtimeCommand, SerialBridge, SerialPortInfo,
    SerialPortOpener, SimulatedGrbl, SimulatorOpener, StatusReport,
};
pub use gcodebridge_core::{
    AppEvent, ConnectionError, ControllerError, Error, EventBus, EventBusConfig, Result,
};
pub use gcodebridge_server::{router, serve, shutdown_signal, AppState};
pub use gcodebridge_settings::{default_config_path, Config, LogFormat, LoggingSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Filter directive for a `-v` count, if it raises the configured level
pub fn verbosity_level(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `settings.level`. Output goes to stdout
/// in the configured format.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(settings.level.trim())?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_thread_names(true)
                    .json(),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false)
                    .compact(),
            )
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_level() {
        assert_eq!(verbosity_level(0), None);
        assert_eq!(verbosity_level(1), Some("debug"));
        assert_eq!(verbosity_level(4), Some("trace"));
    }

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert!(BUILD_DATE.ends_with("UTC"));
    }
}
