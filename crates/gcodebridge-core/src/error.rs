//! Error handling for GCodeBridge
//!
//! Provides the error types for every layer of the bridge:
//! - Connection errors (serial port discovery, open, loss)
//! - Controller errors (responses and timeouts from the GRBL controller)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents failures reported by, or while waiting on, the CNC controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Command was rejected by the controller with `error:N`
    #[error("error:{code} - {message}")]
    CommandRejected {
        /// The GRBL error code.
        code: u8,
        /// Decoded description of the error code.
        message: String,
    },

    /// Controller entered an alarm state with `ALARM:N`
    #[error("ALARM:{code} - {message}")]
    Alarm {
        /// The GRBL alarm code.
        code: u8,
        /// Decoded description of the alarm code.
        message: String,
    },

    /// No terminal response arrived in time
    #[error("Controller operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Command failed local validation and was never sent
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// Why the command was refused.
        reason: String,
    },

    /// Controller restarted while a command was awaiting its response
    #[error("Controller reset before the command completed")]
    Reset,

    /// Too many requests are already waiting on the serial line
    #[error("Controller busy: {pending} requests pending")]
    Busy {
        /// Requests queued when this one was refused.
        pending: usize,
    },
}

/// Connection error type
///
/// Represents errors related to the serial link to the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Auto-detection found no candidate port
    #[error("No serial port detected")]
    NoPortDetected,

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// No controller is attached
    #[error("No device connected")]
    NotConnected,

    /// A controller is already attached
    #[error("Already connected to {port}")]
    AlreadyConnected {
        /// The port currently in use.
        port: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for GCodeBridge
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_error_display() {
        let err = ControllerError::CommandRejected {
            code: 20,
            message: "Unsupported command".to_string(),
        };
        assert_eq!(err.to_string(), "error:20 - Unsupported command");

        let err = ControllerError::Timeout { timeout_ms: 500 };
        assert_eq!(err.to_string(), "Controller operation timed out after 500ms");
    }

    #[test]
    fn test_connection_error_display() {
        assert_eq!(
            ConnectionError::NotConnected.to_string(),
            "No device connected"
        );
        let err = ConnectionError::FailedToOpen {
            port: "COM3".to_string(),
            reason: "Access denied".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to open port COM3: Access denied");
    }

    #[test]
    fn test_classification() {
        let err: Error = ControllerError::Timeout { timeout_ms: 1 }.into();
        assert!(err.is_timeout());
        assert!(err.is_controller_error());
        assert!(!err.is_connection_error());

        let err: Error = ConnectionError::NotConnected.into();
        assert!(err.is_connection_error());
        assert!(!err.is_timeout());

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
