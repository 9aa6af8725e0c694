//! Event type definitions for the event bus.
//!
//! Events are organized by category and are cloneable and serializable so
//! they can be relayed verbatim to WebSocket clients.

use serde::{Deserialize, Serialize};

use crate::data::CNCPoint;

/// Root event enum for all bridge events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Serial connection lifecycle
    Connection(ConnectionEvent),
    /// Raw traffic on the serial line
    Communication(CommunicationEvent),
    /// Parsed machine state
    Machine(MachineEvent),
    /// Error and diagnostic events
    Error(ErrorEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Communication(_) => EventCategory::Communication,
            AppEvent::Machine(_) => EventCategory::Machine,
            AppEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Communication(e) => e.description(),
            AppEvent::Machine(e) => e.description(),
            AppEvent::Error(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Serial connection events.
    Connection,
    /// Serial traffic events.
    Communication,
    /// Machine state events.
    Machine,
    /// Error and diagnostic events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Communication => write!(f, "Communication"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// User requested disconnect
    UserRequested,
    /// Connection lost unexpectedly
    ConnectionLost,
    /// Bridge is shutting down
    Shutdown,
}

/// Connection-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Starting connection attempt.
    Connecting {
        /// Serial port path being connected to.
        port: String,
    },
    /// Successfully connected and initialized.
    Connected {
        /// Serial port path that was connected.
        port: String,
    },
    /// Disconnected from device.
    Disconnected {
        /// Serial port path that was disconnected.
        port: String,
        /// Reason for the disconnection.
        reason: DisconnectReason,
    },
    /// Connection attempt failed.
    ConnectionFailed {
        /// Serial port path that failed to connect.
        port: String,
        /// Error message describing the failure.
        error: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Connecting { port } => format!("Connecting to {}", port),
            ConnectionEvent::Connected { port } => format!("Connected to {}", port),
            ConnectionEvent::Disconnected { port, reason } => {
                format!("Disconnected from {}: {:?}", port, reason)
            }
            ConnectionEvent::ConnectionFailed { port, error } => {
                format!("Connection failed to {}: {}", port, error)
            }
        }
    }
}

/// Communication layer events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommunicationEvent {
    /// A command line written to the device.
    DataSent {
        /// The data that was transmitted, without the line terminator.
        data: String,
    },
    /// A complete line received from the device.
    DataReceived {
        /// The raw response line, without the line terminator.
        data: String,
    },
    /// Timeout occurred.
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },
}

fn truncate_for_log(data: &str) -> String {
    match data.char_indices().nth(50) {
        Some((idx, _)) => format!("{}...", &data[..idx]),
        None => data.to_string(),
    }
}

impl CommunicationEvent {
    fn description(&self) -> String {
        match self {
            CommunicationEvent::DataSent { data } => {
                format!("TX: {}", truncate_for_log(data).trim())
            }
            CommunicationEvent::DataReceived { data } => {
                format!("RX: {}", truncate_for_log(data).trim())
            }
            CommunicationEvent::Timeout { operation } => {
                format!("Timeout: {}", operation)
            }
        }
    }
}

/// Machine state events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MachineEvent {
    /// A status report was received.
    StatusReport {
        /// Machine state name (Idle, Run, Hold, Alarm, ...).
        state: String,
        /// Machine position.
        machine_pos: CNCPoint,
        /// Work position.
        work_pos: CNCPoint,
    },
    /// Alarm triggered.
    AlarmTriggered {
        /// Alarm code number.
        code: u8,
        /// Human-readable alarm message.
        message: String,
    },
    /// Homing cycle requested.
    HomingStarted,
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::StatusReport {
                state, machine_pos, ..
            } => format!("Status: {} @ {}", state, machine_pos),
            MachineEvent::AlarmTriggered { code, message } => {
                format!("Alarm {}: {}", code, message)
            }
            MachineEvent::HomingStarted => "Homing started".to_string(),
        }
    }
}

/// A failure that happened outside any request, such as the serial link
/// dying underneath the I/O thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Component that raised the error.
    pub source: String,
    /// Error message.
    pub message: String,
}

impl ErrorEvent {
    /// Create a new error event
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }

    fn description(&self) -> String {
        format!("Error in {}: {}", self.source, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let event = AppEvent::Communication(CommunicationEvent::DataReceived {
            data: "ok".to_string(),
        });
        assert_eq!(event.category(), EventCategory::Communication);
        assert_eq!(event.description(), "RX: ok");

        let event = AppEvent::Machine(MachineEvent::HomingStarted);
        assert_eq!(event.category(), EventCategory::Machine);
    }

    #[test]
    fn test_long_data_is_truncated_in_description() {
        let data = "G1 X1 ".repeat(20);
        let event = CommunicationEvent::DataSent { data };
        let description = event.description();
        assert!(description.ends_with("..."));
        assert!(description.len() < 60);
    }

    #[test]
    fn test_event_serializes() {
        let event = AppEvent::Connection(ConnectionEvent::Connected {
            port: "/dev/ttyUSB0".to_string(),
        });
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("/dev/ttyUSB0"));
        let back: AppEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }
}
