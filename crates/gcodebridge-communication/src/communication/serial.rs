//! Serial port communication implementation
//!
//! Provides port enumeration, auto-detection of the most likely GRBL board,
//! and the [`RealSerialPort`] link backed by the `serialport` crate.

use super::{ConnectionParams, SerialLink, SerialParity};
use gcodebridge_core::{ConnectionError, Error, Result};
use serde::Serialize;
use std::io;
use std::time::Duration;

/// USB vendor IDs of the USB-serial chips found on GRBL boards, most common first
const GRBL_BOARD_VIDS: &[(u16, &str)] = &[
    (0x1A86, "QinHeng CH340"),
    (0x2341, "Arduino"),
    (0x0403, "FTDI"),
    (0x10C4, "Silicon Labs CP210x"),
    (0x2A03, "Arduino.org"),
];

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Whether the port is a USB device
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }

    /// Name of the known GRBL board chip, if the VID matches one
    pub fn known_board(&self) -> Option<&'static str> {
        let vid = self.vid?;
        GRBL_BOARD_VIDS
            .iter()
            .find(|(known, _)| *known == vid)
            .map(|(_, name)| *name)
    }
}

/// List serial ports that look like CNC controllers
///
/// Filters the system's ports down to:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*, and the /dev/ttyGRBL simulator link
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let mut info = info.with_usb_ids(usb.vid, usb.pid);
                    if let Some(ref mfg) = usb.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

/// Pick the port most likely to be a GRBL controller
///
/// Preference order: a USB port with a known GRBL board chip, then any USB
/// port, then the first listed port.
pub fn detect_port(ports: &[SerialPortInfo]) -> Result<SerialPortInfo> {
    let chosen = ports
        .iter()
        .find(|p| p.known_board().is_some())
        .or_else(|| ports.iter().find(|p| p.is_usb()))
        .or_else(|| ports.first())
        .cloned()
        .ok_or(ConnectionError::NoPortDetected)?;

    tracing::info!(
        "Auto-detected port {} ({})",
        chosen.port_name,
        chosen.known_board().unwrap_or(chosen.description.as_str())
    );
    Ok(chosen)
}

/// Check if a port name matches CNC controller patterns
pub(crate) fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name == "/dev/ttyGRBL"
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Serial link backed by the `serialport` crate
pub struct RealSerialPort {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl RealSerialPort {
    /// Open a serial port with the given parameters
    ///
    /// `params.port` must already be resolved; `"auto"` is not accepted here.
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        if params.is_auto() {
            return Err(ConnectionError::InvalidParameters {
                reason: "port must be resolved before opening".to_string(),
            }
            .into());
        }

        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("invalid data bits: {}", other),
                }
                .into())
            }
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("invalid stop bits: {}", other),
                }
                .into())
            }
        };

        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms.max(1)))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            })
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                match e.kind() {
                    serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                        port: params.port.clone(),
                    },
                    _ => ConnectionError::FailedToOpen {
                        port: params.port.clone(),
                        reason: e.to_string(),
                    },
                }
            })?;

        Ok(Self {
            name: params.port.clone(),
            port,
        })
    }
}

impl SerialLink for RealSerialPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)?;
        io::Write::flush(&mut self.port)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.port, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
