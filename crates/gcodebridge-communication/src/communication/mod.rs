//! Serial link layer
//!
//! A [`SerialLink`] is an open, byte-oriented connection to a controller.
//! The bridge's I/O thread is the only code that ever holds one.

pub mod line;
pub mod serial;
pub mod simulator;

use serde::{Deserialize, Serialize};
use std::io;

/// Parity setting for serial connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters used to open a serial connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name, or `"auto"` to pick one with [`serial::detect_port`]
    pub port: String,
    /// Baud rate (GRBL 1.1 defaults to 115200)
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Read timeout in milliseconds; also paces the I/O loop
    pub timeout_ms: u64,
}

impl ConnectionParams {
    /// Parameters for `port` at `baud_rate`, everything else default
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Whether the port should be picked by auto-detection
    pub fn is_auto(&self) -> bool {
        let port = self.port.trim();
        port.is_empty() || port.eq_ignore_ascii_case("auto")
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: "auto".to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 50,
        }
    }
}

/// An open byte stream to a controller
///
/// `read` must not block indefinitely: a read timeout is reported as `Ok(0)`
/// so the I/O loop can service queued requests between reads.
pub trait SerialLink: Send {
    /// Write all bytes to the link
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes; `Ok(0)` means nothing arrived before the timeout
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard anything buffered on the input side
    fn clear_input(&mut self) -> io::Result<()>;

    /// The port name this link was opened on
    fn name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_port() {
        assert!(ConnectionParams::default().is_auto());
        assert!(ConnectionParams::new("", 115_200).is_auto());
        assert!(ConnectionParams::new("AUTO", 115_200).is_auto());
        assert!(!ConnectionParams::new("COM3", 115_200).is_auto());
    }

    #[test]
    fn test_parity_serde() {
        let json = serde_json::to_string(&SerialParity::Even).unwrap();
        assert_eq!(json, "\"even\"");
    }
}
